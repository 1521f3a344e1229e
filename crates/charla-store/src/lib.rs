//! # charla-store
//!
//! Storage for the Charla client.
//!
//! - [`remote`] defines the async contracts of the hosted document store and
//!   realtime store, including RAII listener subscriptions.
//! - [`memory`] implements both contracts in-process (tests, simulation).
//! - [`Database`] wraps a local SQLite connection for device-only state: the
//!   session marker and the cached push token.

pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod remote;
pub mod session;
pub mod tokens;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::{Fault, MemoryDocumentStore, MemoryRealtimeStore};
pub use models::*;
pub use remote::{
    DocumentStore, ListenerGuard, MessageSubscription, PresenceSubscription, RealtimeStore,
    Subscription,
};
