//! # charla-shared
//!
//! Identifiers, presence value decoding, push payloads and constants shared by
//! the store and client crates.

pub mod constants;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod types;

pub use error::SharedError;
pub use presence::{PresenceState, PresenceValue};
pub use protocol::{PushKind, PushPayload};
pub use types::{AppLifecycle, ConversationId, MessageId, UserId};
