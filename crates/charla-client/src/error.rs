use thiserror::Error;

use charla_shared::SharedError;
use charla_store::StoreError;

/// Failures surfaced to callers of the client services.
///
/// Only the message path and explicit user actions return these; the
/// presence, reconciliation and notification side channels log and degrade.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    Shared(#[from] SharedError),

    #[error("No signed-in user")]
    NotSignedIn,

    #[error("Message has neither text nor attachment")]
    EmptyMessage,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("No user registered with email {0}")]
    UserNotFound(String),

    #[error("Cannot open a conversation with yourself")]
    SelfConversation,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}

pub type Result<T> = std::result::Result<T, ChatError>;
