//! Contracts of the two remote stores the client runs on.
//!
//! The document store holds conversations, messages, profiles and the
//! presence mirror. The realtime store holds the authoritative presence flag
//! and supports server-side on-disconnect actions. Both are injected into the
//! client services as `Arc<dyn ...>`.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use charla_shared::{ConversationId, UserId};

use crate::error::Result;
use crate::models::{
    ConversationRecord, MessageRecord, NewMessage, PresenceMirror, ProfilePatch, UserProfile,
};

/// Live listener registration. Every change is delivered as a full snapshot;
/// dropping the subscription unregisters the listener.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    _guard: ListenerGuard,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>, guard: ListenerGuard) -> Self {
        Self { rx, _guard: guard }
    }

    /// Next snapshot, or `None` once the store side has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant, mostly useful in tests.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Runs its release hook exactly once, on drop.
pub struct ListenerGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A guard with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub type MessageSubscription = Subscription<Vec<MessageRecord>>;
pub type PresenceSubscription = Subscription<Option<serde_json::Value>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All conversations whose participant list contains `user`, in store order.
    async fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationRecord>>;

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>>;

    /// Create or overwrite a conversation document.
    async fn put_conversation(&self, conversation: &ConversationRecord) -> Result<()>;

    async fn set_last_message(&self, id: &ConversationId, preview: &str) -> Result<()>;

    /// Batch delete; either every id is removed or none is.
    async fn delete_conversations(&self, ids: &[ConversationId]) -> Result<()>;

    async fn add_message(&self, message: NewMessage) -> Result<MessageRecord>;

    /// Ordered snapshots of a conversation's messages. The current state is
    /// delivered immediately after registration.
    async fn subscribe_messages(&self, id: &ConversationId) -> Result<MessageSubscription>;

    async fn get_profile(&self, user: &UserId) -> Result<Option<UserProfile>>;

    /// Exact match on the stored (lowercased) email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>>;

    /// Merge write; creates the document when missing.
    async fn merge_profile(&self, user: &UserId, patch: ProfilePatch) -> Result<()>;

    async fn merge_presence_mirror(&self, user: &UserId, mirror: PresenceMirror) -> Result<()>;
}

#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn set_presence(&self, user: &UserId, value: serde_json::Value) -> Result<()>;

    async fn get_presence(&self, user: &UserId) -> Result<Option<serde_json::Value>>;

    /// Register a value the server writes if this client's connection drops.
    async fn set_on_disconnect(&self, user: &UserId, value: serde_json::Value) -> Result<()>;

    async fn cancel_on_disconnect(&self, user: &UserId) -> Result<()>;

    /// Raw values under `presence/{user}`, current value first.
    async fn watch_presence(&self, user: &UserId) -> Result<PresenceSubscription>;
}
