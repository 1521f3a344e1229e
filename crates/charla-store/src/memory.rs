//! In-process implementations of [`DocumentStore`] and [`RealtimeStore`].
//!
//! They behave like the hosted stores as far as the client can observe:
//! snapshots are pushed on every change, server timestamps are assigned on
//! write, batch deletes are atomic and on-disconnect actions fire when
//! [`MemoryRealtimeStore::disconnect`] simulates a dropped connection.
//! Faults can be injected per operation class to exercise the error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use charla_shared::{ConversationId, MessageId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{
    sort_messages, ConversationRecord, MessageRecord, NewMessage, PresenceMirror, ProfilePatch,
    UserProfile,
};
use crate::remote::{
    DocumentStore, ListenerGuard, MessageSubscription, PresenceSubscription, RealtimeStore,
    Subscription,
};

/// Operation classes that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Query,
    Delete,
    MessageWrite,
    ProfileRead,
    ProfileWrite,
    MirrorWrite,
    PresenceWrite,
}

fn check(faults: &HashSet<Fault>, fault: Fault) -> Result<()> {
    if faults.contains(&fault) {
        return Err(StoreError::Unavailable(format!("injected {fault:?} failure")));
    }
    Ok(())
}

type Listeners<K, T> = HashMap<K, Vec<(u64, mpsc::UnboundedSender<T>)>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Document store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DocInner {
    /// Insertion order doubles as query order.
    conversations: Vec<ConversationRecord>,
    messages: HashMap<ConversationId, Vec<MessageRecord>>,
    profiles: HashMap<UserId, UserProfile>,
    mirrors: HashMap<UserId, PresenceMirror>,
    listeners: Listeners<ConversationId, Vec<MessageRecord>>,
    next_listener: u64,
    faults: HashSet<Fault>,
    profile_delay: Option<Duration>,
    mirror_delay: Option<Duration>,
    profile_reads: usize,
    delete_batches: usize,
}

impl DocInner {
    fn snapshot(&self, id: &ConversationId) -> Vec<MessageRecord> {
        self.messages.get(id).cloned().unwrap_or_default()
    }

    fn publish(&mut self, id: &ConversationId) {
        let snapshot = self.snapshot(id);
        if let Some(listeners) = self.listeners.get_mut(id) {
            listeners.retain(|(_, tx)| tx.send(snapshot.clone()).is_ok());
        }
    }

    fn insert_message(&mut self, message: MessageRecord) {
        let id = message.conversation_id.clone();
        let list = self.messages.entry(id.clone()).or_default();
        list.push(message);
        sort_messages(list);
        self.publish(&id);
    }
}

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<DocInner>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.inner).faults.insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        lock(&self.inner).faults.remove(&fault);
    }

    /// Delay every profile read, to keep lookups in flight.
    pub fn set_profile_delay(&self, delay: Option<Duration>) {
        lock(&self.inner).profile_delay = delay;
    }

    /// Hold the next presence mirror write back for `delay`.
    pub fn delay_next_mirror(&self, delay: Duration) {
        lock(&self.inner).mirror_delay = Some(delay);
    }

    pub fn insert_conversation(&self, conversation: ConversationRecord) {
        let mut inner = lock(&self.inner);
        upsert_conversation(&mut inner.conversations, conversation);
    }

    /// Insert a fully formed message (id and timestamp chosen by the caller).
    pub fn insert_message(&self, message: MessageRecord) {
        lock(&self.inner).insert_message(message);
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        lock(&self.inner).profiles.insert(profile.id.clone(), profile);
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        lock(&self.inner)
            .conversations
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<ConversationRecord> {
        lock(&self.inner)
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    pub fn messages(&self, id: &ConversationId) -> Vec<MessageRecord> {
        lock(&self.inner).snapshot(id)
    }

    pub fn profile(&self, user: &UserId) -> Option<UserProfile> {
        lock(&self.inner).profiles.get(user).cloned()
    }

    pub fn mirror(&self, user: &UserId) -> Option<PresenceMirror> {
        lock(&self.inner).mirrors.get(user).copied()
    }

    pub fn listener_count(&self, id: &ConversationId) -> usize {
        lock(&self.inner).listeners.get(id).map_or(0, Vec::len)
    }

    pub fn profile_reads(&self) -> usize {
        lock(&self.inner).profile_reads
    }

    pub fn delete_batches(&self) -> usize {
        lock(&self.inner).delete_batches
    }
}

fn upsert_conversation(list: &mut Vec<ConversationRecord>, conversation: ConversationRecord) {
    match list.iter_mut().find(|c| c.id == conversation.id) {
        Some(existing) => *existing = conversation,
        None => list.push(conversation),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn conversations_for(&self, user: &UserId) -> Result<Vec<ConversationRecord>> {
        let inner = lock(&self.inner);
        check(&inner.faults, Fault::Query)?;
        Ok(inner
            .conversations
            .iter()
            .filter(|c| c.has_participant(user))
            .cloned()
            .collect())
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        let inner = lock(&self.inner);
        check(&inner.faults, Fault::Query)?;
        Ok(inner.conversations.iter().find(|c| &c.id == id).cloned())
    }

    async fn put_conversation(&self, conversation: &ConversationRecord) -> Result<()> {
        let mut inner = lock(&self.inner);
        upsert_conversation(&mut inner.conversations, conversation.clone());
        Ok(())
    }

    async fn set_last_message(&self, id: &ConversationId, preview: &str) -> Result<()> {
        let mut inner = lock(&self.inner);
        let conversation = inner
            .conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or(StoreError::NotFound)?;
        conversation.last_message = preview.to_string();
        Ok(())
    }

    async fn delete_conversations(&self, ids: &[ConversationId]) -> Result<()> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::Delete)?;
        inner.delete_batches += 1;
        inner.conversations.retain(|c| !ids.contains(&c.id));
        for id in ids {
            inner.messages.remove(id);
        }
        debug!(count = ids.len(), "batch deleted conversations");
        Ok(())
    }

    async fn add_message(&self, message: NewMessage) -> Result<MessageRecord> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::MessageWrite)?;
        if !inner
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(StoreError::NotFound);
        }
        let record = MessageRecord {
            id: MessageId::new(),
            conversation_id: message.conversation_id,
            text: message.text,
            attachment: message.attachment,
            sender_id: message.sender_id,
            created_at: Some(Utc::now()),
        };
        inner.insert_message(record.clone());
        Ok(record)
    }

    async fn subscribe_messages(&self, id: &ConversationId) -> Result<MessageSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::Query)?;

        let listener_id = inner.next_listener;
        inner.next_listener += 1;
        // Initial snapshot; the receiver is alive so the send cannot fail.
        let _ = tx.send(inner.snapshot(id));
        inner
            .listeners
            .entry(id.clone())
            .or_default()
            .push((listener_id, tx));

        let weak: Weak<Mutex<DocInner>> = Arc::downgrade(&self.inner);
        let key = id.clone();
        let guard = ListenerGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = lock(&inner);
                if let Some(listeners) = inner.listeners.get_mut(&key) {
                    listeners.retain(|(id, _)| *id != listener_id);
                }
                debug!(conversation = %key, "message listener removed");
            }
        });
        Ok(Subscription::new(rx, guard))
    }

    async fn get_profile(&self, user: &UserId) -> Result<Option<UserProfile>> {
        let delay = {
            let mut inner = lock(&self.inner);
            check(&inner.faults, Fault::ProfileRead)?;
            inner.profile_reads += 1;
            inner.profile_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(lock(&self.inner).profiles.get(user).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>> {
        let inner = lock(&self.inner);
        check(&inner.faults, Fault::ProfileRead)?;
        Ok(inner
            .profiles
            .values()
            .find(|p| p.email.as_deref() == Some(email))
            .cloned())
    }

    async fn merge_profile(&self, user: &UserId, patch: ProfilePatch) -> Result<()> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::ProfileWrite)?;
        let profile = inner
            .profiles
            .entry(user.clone())
            .or_insert_with(|| UserProfile {
                id: user.clone(),
                ..Default::default()
            });
        patch.apply(profile);
        Ok(())
    }

    async fn merge_presence_mirror(&self, user: &UserId, mirror: PresenceMirror) -> Result<()> {
        let delay = lock(&self.inner).mirror_delay.take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::MirrorWrite)?;
        inner.mirrors.insert(user.clone(), mirror);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Realtime store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RtInner {
    values: HashMap<UserId, serde_json::Value>,
    on_disconnect: HashMap<UserId, serde_json::Value>,
    watchers: Listeners<UserId, Option<serde_json::Value>>,
    next_watcher: u64,
    faults: HashSet<Fault>,
}

impl RtInner {
    fn write(&mut self, user: &UserId, value: serde_json::Value) {
        self.values.insert(user.clone(), value.clone());
        if let Some(watchers) = self.watchers.get_mut(user) {
            watchers.retain(|(_, tx)| tx.send(Some(value.clone())).is_ok());
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryRealtimeStore {
    inner: Arc<Mutex<RtInner>>,
}

impl MemoryRealtimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.inner).faults.insert(fault);
    }

    pub fn heal(&self, fault: Fault) {
        lock(&self.inner).faults.remove(&fault);
    }

    /// Write any raw shape, bypassing the client (other apps, old clients).
    pub fn set_raw(&self, user: &UserId, value: serde_json::Value) {
        lock(&self.inner).write(user, value);
    }

    pub fn value(&self, user: &UserId) -> Option<serde_json::Value> {
        lock(&self.inner).values.get(user).cloned()
    }

    pub fn pending_on_disconnect(&self, user: &UserId) -> Option<serde_json::Value> {
        lock(&self.inner).on_disconnect.get(user).cloned()
    }

    pub fn watcher_count(&self, user: &UserId) -> usize {
        lock(&self.inner).watchers.get(user).map_or(0, Vec::len)
    }

    /// Simulate the server noticing that `user`'s connection dropped: the
    /// pending on-disconnect action, if any, is applied once.
    pub fn disconnect(&self, user: &UserId) {
        let mut inner = lock(&self.inner);
        if let Some(value) = inner.on_disconnect.remove(user) {
            debug!(user = %user, "firing on-disconnect action");
            inner.write(user, value);
        }
    }
}

#[async_trait]
impl RealtimeStore for MemoryRealtimeStore {
    async fn set_presence(&self, user: &UserId, value: serde_json::Value) -> Result<()> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::PresenceWrite)?;
        inner.write(user, value);
        Ok(())
    }

    async fn get_presence(&self, user: &UserId) -> Result<Option<serde_json::Value>> {
        let inner = lock(&self.inner);
        check(&inner.faults, Fault::Query)?;
        Ok(inner.values.get(user).cloned())
    }

    async fn set_on_disconnect(&self, user: &UserId, value: serde_json::Value) -> Result<()> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::PresenceWrite)?;
        inner.on_disconnect.insert(user.clone(), value);
        Ok(())
    }

    async fn cancel_on_disconnect(&self, user: &UserId) -> Result<()> {
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::PresenceWrite)?;
        inner.on_disconnect.remove(user);
        Ok(())
    }

    async fn watch_presence(&self, user: &UserId) -> Result<PresenceSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);
        check(&inner.faults, Fault::Query)?;

        let watcher_id = inner.next_watcher;
        inner.next_watcher += 1;
        let _ = tx.send(inner.values.get(user).cloned());
        inner
            .watchers
            .entry(user.clone())
            .or_default()
            .push((watcher_id, tx));

        let weak = Arc::downgrade(&self.inner);
        let key = user.clone();
        let guard = ListenerGuard::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Some(watchers) = lock(&inner).watchers.get_mut(&key) {
                    watchers.retain(|(id, _)| *id != watcher_id);
                }
            }
        });
        Ok(Subscription::new(rx, guard))
    }
}
