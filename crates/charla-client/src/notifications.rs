//! Local notifications, inbound push payloads and push token bookkeeping.
//!
//! Chat notifications raised by the message stream and notifications rendered
//! from remote push payloads end up in the same [`Notification`] model and go
//! through one injected [`NotificationSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use charla_shared::constants::{
    FALLBACK_DISPLAY_NAME, MESSAGES_LOST_BODY, MESSAGES_LOST_TITLE, PUSH_DEFAULT_BODY,
    PUSH_DEFAULT_TITLE, TOKEN_MAX_AGE_MILLIS,
};
use charla_shared::{ConversationId, PushKind, PushPayload, UserId};
use charla_store::{DocumentStore, LocalPushToken, ProfilePatch};

use crate::auth::AuthProvider;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::events::{emit_event, UiEvent};
use crate::{lock_db, SharedDatabase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Chat messages; carries a deep link.
    Messages,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Deep-link target opened on tap.
    pub conversation_id: Option<ConversationId>,
    pub sender_id: Option<UserId>,
    pub channel: Channel,
    pub priority: Priority,
    /// Epoch millis shown on the notification.
    pub timestamp: i64,
}

/// Where rendered notifications are delivered (OS tray, terminal, test).
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
}

/// Keeps every delivered notification in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.delivered.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: Notification) {
        self.delivered
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(notification);
    }
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, n: Notification) {
        info!(
            title = %n.title,
            body = %n.body,
            conversation = n.conversation_id.as_ref().map(|c| c.as_str()),
            channel = ?n.channel,
            priority = ?n.priority,
            "notification"
        );
    }
}

// ---------------------------------------------------------------------------
// Push tokens
// ---------------------------------------------------------------------------

/// A token upsert that failed and must be retried off the caller's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSyncJob {
    pub user: UserId,
    pub token: String,
    pub device_info: String,
    pub app_version: String,
    pub platform: String,
}

impl TokenSyncJob {
    pub fn patch(&self, updated_at: chrono::DateTime<chrono::Utc>) -> ProfilePatch {
        ProfilePatch {
            push_token: Some(Some(self.token.clone())),
            token_updated_at: Some(updated_at),
            device_info: Some(self.device_info.clone()),
            app_version: Some(self.app_version.clone()),
            platform: Some(self.platform.clone()),
            ..Default::default()
        }
    }
}

/// Receives failed token upserts.
pub trait TokenRetryQueue: Send + Sync {
    fn enqueue(&self, job: TokenSyncJob);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Same token as before; only the local timestamp moved.
    Refreshed,
    /// Stored locally; nobody is signed in to attach it to.
    StoredLocally,
    /// Stored locally and on the profile.
    Synced,
    /// Stored locally; the profile upsert failed and was queued for retry.
    Queued,
}

/// Local token cache plus the profile upsert.
pub struct PushTokens {
    db: SharedDatabase,
    documents: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    retry: Arc<dyn TokenRetryQueue>,
    device_info: String,
    app_version: String,
    platform: String,
}

impl PushTokens {
    pub fn new(
        config: &ClientConfig,
        db: SharedDatabase,
        documents: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        retry: Arc<dyn TokenRetryQueue>,
    ) -> Self {
        Self {
            db,
            documents,
            auth,
            clock,
            retry,
            device_info: config.device_info.clone(),
            app_version: config.app_version.clone(),
            platform: config.platform.clone(),
        }
    }

    pub async fn on_token_rotated(&self, token: &str) -> TokenOutcome {
        let now = self.clock.now_millis();
        let previous = match lock_db(&self.db).push_token() {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "failed to read cached push token");
                None
            }
        };

        if previous.as_ref().is_some_and(|p| p.token == token) {
            if let Err(e) = lock_db(&self.db).touch_push_token(now) {
                warn!(error = %e, "failed to refresh push token timestamp");
            }
            debug!("push token unchanged, timestamp refreshed");
            return TokenOutcome::Refreshed;
        }

        let local = LocalPushToken {
            token: token.to_string(),
            updated_at: now,
            device_info: self.device_info.clone(),
        };
        if let Err(e) = lock_db(&self.db).save_push_token(&local) {
            warn!(error = %e, "failed to cache push token");
        }

        let Some(user) = self.auth.current_user() else {
            debug!("push token cached, no signed-in user to attach it to");
            return TokenOutcome::StoredLocally;
        };
        self.sync(user, token).await
    }

    /// Upsert the token onto `user`'s profile, queueing a retry on failure.
    pub async fn sync(&self, user: UserId, token: &str) -> TokenOutcome {
        let job = TokenSyncJob {
            user,
            token: token.to_string(),
            device_info: self.device_info.clone(),
            app_version: self.app_version.clone(),
            platform: self.platform.clone(),
        };
        match self
            .documents
            .merge_profile(&job.user, job.patch(self.clock.now()))
            .await
        {
            Ok(()) => {
                info!(user = %job.user, "push token synced");
                TokenOutcome::Synced
            }
            Err(e) => {
                warn!(user = %job.user, error = %e, "push token sync failed, queueing retry");
                self.retry.enqueue(job);
                TokenOutcome::Queued
            }
        }
    }

    /// Attach the cached token, if any, to the user that just signed in.
    pub async fn sync_cached(&self) -> Option<TokenOutcome> {
        let user = self.auth.current_user()?;
        let token = self.current_token()?;
        Some(self.sync(user, &token).await)
    }

    pub fn current_token(&self) -> Option<String> {
        match lock_db(&self.db).push_token() {
            Ok(token) => token.map(|t| t.token),
            Err(e) => {
                warn!(error = %e, "failed to read cached push token");
                None
            }
        }
    }

    /// True when no token is cached or it was last refreshed more than
    /// 30 days ago.
    pub fn is_token_stale(&self) -> bool {
        match lock_db(&self.db).push_token() {
            Ok(Some(token)) => {
                self.clock.now_millis().saturating_sub(token.updated_at) > TOKEN_MAX_AGE_MILLIS
            }
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "failed to read cached push token");
                true
            }
        }
    }

    /// Drop the cached token and detach it from the signed-in user's
    /// profile. Must run before the auth session is cleared.
    pub async fn clear_on_logout(&self) {
        if let Err(e) = lock_db(&self.db).clear_push_token() {
            warn!(error = %e, "failed to clear cached push token");
        }
        let Some(user) = self.auth.current_user() else {
            return;
        };
        let patch = ProfilePatch {
            push_token: Some(None),
            token_updated_at: Some(self.clock.now()),
            ..Default::default()
        };
        if let Err(e) = self.documents.merge_profile(&user, patch).await {
            warn!(user = %user, error = %e, "failed to remove push token from profile");
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    events: mpsc::UnboundedSender<UiEvent>,
    tokens: PushTokens,
    clock: Arc<dyn Clock>,
    enabled: bool,
    foreground: AtomicBool,
}

impl NotificationDispatcher {
    pub fn new(
        config: &ClientConfig,
        sink: Arc<dyn NotificationSink>,
        events: mpsc::UnboundedSender<UiEvent>,
        tokens: PushTokens,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sink,
            events,
            tokens,
            clock,
            enabled: config.notifications_enabled,
            foreground: AtomicBool::new(false),
        }
    }

    pub fn tokens(&self) -> &PushTokens {
        &self.tokens
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }

    /// Render and deliver a notification. Returns what was delivered, or
    /// `None` when notifications are disabled.
    pub fn notify(
        &self,
        title: &str,
        body: &str,
        conversation_id: Option<&ConversationId>,
        high_priority: bool,
    ) -> Option<Notification> {
        self.deliver(Notification {
            title: title.to_string(),
            body: body.to_string(),
            conversation_id: conversation_id.cloned(),
            sender_id: None,
            channel: if conversation_id.is_some() {
                Channel::Messages
            } else {
                Channel::General
            },
            priority: if high_priority {
                Priority::High
            } else {
                Priority::Default
            },
            timestamp: self.clock.now_millis(),
        })
    }

    fn deliver(&self, notification: Notification) -> Option<Notification> {
        if !self.enabled {
            debug!(title = %notification.title, "notifications disabled, dropping");
            return None;
        }
        self.sink.deliver(notification.clone());
        Some(notification)
    }

    /// Navigation for a tapped notification.
    pub fn on_tap(&self, notification: &Notification) {
        let event = match &notification.conversation_id {
            Some(id) => UiEvent::OpenConversation {
                conversation_id: id.clone(),
            },
            None => UiEvent::OpenHome,
        };
        emit_event(&self.events, event);
    }

    /// Render an inbound data-only push message.
    pub fn on_remote_push(&self, payload: &PushPayload) -> Option<Notification> {
        if payload.is_empty() {
            debug!("empty push payload ignored");
            return None;
        }

        let title = payload.title.as_deref().unwrap_or(PUSH_DEFAULT_TITLE);
        let body = payload.body.as_deref().unwrap_or(PUSH_DEFAULT_BODY);
        let priority = if self.is_foreground() {
            Priority::Default
        } else {
            Priority::High
        };
        let timestamp = payload
            .timestamp_millis()
            .unwrap_or_else(|| self.clock.now_millis());

        let notification = match payload.kind() {
            PushKind::ChatMessage => Notification {
                title: payload
                    .sender_name
                    .clone()
                    .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string()),
                body: payload
                    .message_text
                    .clone()
                    .unwrap_or_else(|| body.to_string()),
                conversation_id: payload.conversation_id.clone(),
                sender_id: payload.sender_id.clone(),
                channel: if payload.conversation_id.is_some() {
                    Channel::Messages
                } else {
                    Channel::General
                },
                priority,
                timestamp,
            },
            kind => {
                if let PushKind::Other(other) = &kind {
                    warn!(kind = %other, "unknown push type, rendering generically");
                }
                Notification {
                    title: title.to_string(),
                    body: body.to_string(),
                    conversation_id: None,
                    sender_id: None,
                    channel: Channel::General,
                    priority,
                    timestamp,
                }
            }
        };
        self.deliver(notification)
    }

    /// The gateway dropped pending pushes for this device.
    pub fn on_deleted_messages(&self) -> Option<Notification> {
        warn!("push gateway dropped pending messages");
        self.notify(MESSAGES_LOST_TITLE, MESSAGES_LOST_BODY, None, false)
    }

    pub async fn on_token_rotated(&self, token: &str) -> TokenOutcome {
        self.tokens.on_token_rotated(token).await
    }

    pub fn is_token_stale(&self) -> bool {
        self.tokens.is_token_stale()
    }

    pub fn current_token(&self) -> Option<String> {
        self.tokens.current_token()
    }

    pub async fn clear_token_on_logout(&self) {
        self.tokens.clear_on_logout().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use charla_store::{Database, Fault, MemoryDocumentStore};

    use super::*;
    use crate::auth::AuthSession;
    use crate::clock::ManualClock;

    pub(crate) const NOW: i64 = 1_700_000_000_000;

    #[derive(Default)]
    pub(crate) struct RecordingQueue {
        pub jobs: Mutex<Vec<TokenSyncJob>>,
    }

    impl TokenRetryQueue for RecordingQueue {
        fn enqueue(&self, job: TokenSyncJob) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    pub(crate) struct Harness {
        pub dispatcher: Arc<NotificationDispatcher>,
        pub sink: Arc<RecordingSink>,
        pub events: mpsc::UnboundedReceiver<UiEvent>,
        pub documents: MemoryDocumentStore,
        pub queue: Arc<RecordingQueue>,
        pub clock: Arc<ManualClock>,
        pub auth: Arc<AuthSession>,
    }

    pub(crate) fn harness(config: &ClientConfig) -> Harness {
        let (tx, events) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink::new());
        let documents = MemoryDocumentStore::new();
        let queue = Arc::new(RecordingQueue::default());
        let clock = Arc::new(ManualClock::new(NOW));
        let auth = Arc::new(AuthSession::signed_in(UserId::from("u1")));
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let tokens = PushTokens::new(
            config,
            db,
            Arc::new(documents.clone()),
            auth.clone(),
            clock.clone(),
            queue.clone(),
        );
        let dispatcher = Arc::new(NotificationDispatcher::new(
            config,
            sink.clone(),
            tx,
            tokens,
            clock.clone(),
        ));
        Harness {
            dispatcher,
            sink,
            events,
            documents,
            queue,
            clock,
            auth,
        }
    }

    pub(crate) fn dispatcher_with_sink() -> (Arc<NotificationDispatcher>, Arc<RecordingSink>) {
        let h = harness(&ClientConfig::default());
        (h.dispatcher, h.sink)
    }

    fn payload(pairs: &[(&str, &str)]) -> PushPayload {
        let data: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PushPayload::from_data(&data).unwrap()
    }

    #[test]
    fn chat_push_renders_sender_and_deep_link() {
        let h = harness(&ClientConfig::default());
        let n = h
            .dispatcher
            .on_remote_push(&payload(&[
                ("type", "chat_message"),
                ("senderName", "Ana"),
                ("body", "hola"),
                ("conversationId", "dm_u1_u2"),
            ]))
            .unwrap();
        assert_eq!(n.title, "Ana");
        assert_eq!(n.body, "hola");
        assert_eq!(n.conversation_id, Some(ConversationId::from("dm_u1_u2")));
        assert_eq!(n.channel, Channel::Messages);
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.timestamp, NOW);
        assert_eq!(h.sink.delivered(), [n]);
    }

    #[test]
    fn unknown_push_type_renders_generically() {
        let h = harness(&ClientConfig::default());
        let n = h
            .dispatcher
            .on_remote_push(&payload(&[
                ("type", "promo"),
                ("title", "Sale"),
                ("body", "50% off"),
                ("conversationId", "dm_u1_u2"),
            ]))
            .unwrap();
        assert_eq!(n.title, "Sale");
        assert_eq!(n.body, "50% off");
        assert_eq!(n.conversation_id, None);
        assert_eq!(n.channel, Channel::General);
    }

    #[test]
    fn push_defaults_fill_missing_fields() {
        let h = harness(&ClientConfig::default());
        h.dispatcher.set_foreground(true);

        let chat = h
            .dispatcher
            .on_remote_push(&payload(&[("senderId", "u2"), ("timestamp", "42")]))
            .unwrap();
        assert_eq!(chat.title, FALLBACK_DISPLAY_NAME);
        assert_eq!(chat.body, PUSH_DEFAULT_BODY);
        assert_eq!(chat.priority, Priority::Default);
        assert_eq!(chat.timestamp, 42);
        assert_eq!(chat.channel, Channel::General);

        let with_text = h
            .dispatcher
            .on_remote_push(&payload(&[("body", "short…"), ("messageText", "full text")]))
            .unwrap();
        assert_eq!(with_text.body, "full text");

        let system = h
            .dispatcher
            .on_remote_push(&payload(&[("type", "system_notification")]))
            .unwrap();
        assert_eq!(system.title, PUSH_DEFAULT_TITLE);
        assert_eq!(system.body, PUSH_DEFAULT_BODY);
    }

    #[test]
    fn empty_push_is_ignored() {
        let h = harness(&ClientConfig::default());
        assert!(h.dispatcher.on_remote_push(&PushPayload::default()).is_none());
        assert!(h.sink.delivered().is_empty());
    }

    #[test]
    fn disabled_notifications_are_dropped() {
        let config = ClientConfig {
            notifications_enabled: false,
            ..ClientConfig::default()
        };
        let h = harness(&config);
        assert!(h.dispatcher.notify("a", "b", None, true).is_none());
        assert!(h.dispatcher.on_deleted_messages().is_none());
        assert!(h.sink.delivered().is_empty());
    }

    #[test]
    fn deleted_messages_notice_is_general() {
        let h = harness(&ClientConfig::default());
        let n = h.dispatcher.on_deleted_messages().unwrap();
        assert_eq!(n.title, MESSAGES_LOST_TITLE);
        assert_eq!(n.channel, Channel::General);
        assert_eq!(n.priority, Priority::Default);
    }

    #[test]
    fn tap_routes_to_conversation_or_home() {
        let mut h = harness(&ClientConfig::default());
        let chat = h
            .dispatcher
            .notify("Ana", "hola", Some(&ConversationId::from("dm_u1_u2")), true)
            .unwrap();
        let general = h.dispatcher.notify("Hi", "there", None, false).unwrap();

        h.dispatcher.on_tap(&chat);
        h.dispatcher.on_tap(&general);
        assert_eq!(
            h.events.try_recv().unwrap(),
            UiEvent::OpenConversation {
                conversation_id: ConversationId::from("dm_u1_u2")
            }
        );
        assert_eq!(h.events.try_recv().unwrap(), UiEvent::OpenHome);
    }

    #[tokio::test]
    async fn rotated_token_is_synced_with_bookkeeping() {
        let h = harness(&ClientConfig::default());
        let outcome = h.dispatcher.on_token_rotated("tok-1").await;
        assert_eq!(outcome, TokenOutcome::Synced);

        let profile = h.documents.profile(&UserId::from("u1")).unwrap();
        assert_eq!(profile.push_token.as_deref(), Some("tok-1"));
        assert_eq!(profile.token_updated_at.unwrap().timestamp_millis(), NOW);
        assert!(profile.device_info.is_some());
        assert_eq!(profile.platform.as_deref(), Some("rust"));
        assert_eq!(h.dispatcher.current_token().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn unchanged_token_only_refreshes_timestamp() {
        let h = harness(&ClientConfig::default());
        h.dispatcher.on_token_rotated("tok-1").await;
        h.documents.inject(Fault::ProfileWrite);

        h.clock.advance(std::time::Duration::from_secs(60 * 60 * 24 * 31));
        assert!(h.dispatcher.is_token_stale());

        let outcome = h.dispatcher.on_token_rotated("tok-1").await;
        assert_eq!(outcome, TokenOutcome::Refreshed);
        assert!(!h.dispatcher.is_token_stale());
        assert!(h.queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upsert_is_enqueued_exactly_once() {
        let h = harness(&ClientConfig::default());
        h.documents.inject(Fault::ProfileWrite);

        let outcome = h.dispatcher.on_token_rotated("tok-2").await;
        assert_eq!(outcome, TokenOutcome::Queued);

        let jobs = h.queue.jobs.lock().unwrap().clone();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user, UserId::from("u1"));
        assert_eq!(jobs[0].token, "tok-2");
        // Stored locally regardless.
        assert_eq!(h.dispatcher.current_token().as_deref(), Some("tok-2"));
    }

    #[tokio::test]
    async fn token_without_user_stays_local_until_login() {
        let h = harness(&ClientConfig::default());
        h.auth.sign_out();
        assert_eq!(
            h.dispatcher.on_token_rotated("tok-3").await,
            TokenOutcome::StoredLocally
        );
        assert!(h.documents.profile(&UserId::from("u1")).is_none());

        h.auth.sign_in("u1").unwrap();
        assert_eq!(h.dispatcher.tokens().sync_cached().await, Some(TokenOutcome::Synced));
        let profile = h.documents.profile(&UserId::from("u1")).unwrap();
        assert_eq!(profile.push_token.as_deref(), Some("tok-3"));
    }

    #[tokio::test]
    async fn logout_clears_local_and_remote_token() {
        let h = harness(&ClientConfig::default());
        h.dispatcher.on_token_rotated("tok-1").await;
        h.dispatcher.clear_token_on_logout().await;

        assert_eq!(h.dispatcher.current_token(), None);
        assert!(h.dispatcher.is_token_stale());
        let profile = h.documents.profile(&UserId::from("u1")).unwrap();
        assert_eq!(profile.push_token, None);
    }
}
