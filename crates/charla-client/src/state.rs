//! Client state shared with the UI layer.
//!
//! [`ChatCore`] owns one instance of every service, wired to the injected
//! stores, and implements the flows that span several of them: login,
//! logout, resuming the app and opening a conversation.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use charla_shared::{AppLifecycle, ConversationId, UserId};
use charla_store::{Database, DocumentStore, RealtimeStore};

use crate::auth::{AuthProvider, AuthSession};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::events::{emit_event, UiEvent};
use crate::messaging::{Messenger, Peer};
use crate::notifications::{NotificationDispatcher, NotificationSink, PushTokens};
use crate::presence::{PresenceObserver, PresenceTracker};
use crate::reconcile::{ConversationReconciler, ReconcileOutcome};
use crate::session::SessionExpiryGuard;
use crate::stream::MessageStreamProcessor;
use crate::token_sync::BackoffTokenSync;
use crate::view::ConversationView;
use crate::SharedDatabase;

/// Open the local database at the configured path, or in the platform data
/// directory.
pub fn open_database(config: &ClientConfig) -> Result<Database> {
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    Ok(db)
}

/// An open conversation screen: live rows plus header information.
pub struct OpenConversation {
    pub view: ConversationView,
    pub peer: Option<Peer>,
    /// Presence of the peer; absent for conversations without one.
    pub peer_presence: Option<PresenceObserver>,
}

pub struct ChatCore {
    config: ClientConfig,
    auth: Arc<AuthSession>,
    documents: Arc<dyn DocumentStore>,
    session: SessionExpiryGuard,
    presence: PresenceTracker,
    reconciler: ConversationReconciler,
    notifications: Arc<NotificationDispatcher>,
    messenger: Messenger,
    events: mpsc::UnboundedSender<UiEvent>,
}

impl ChatCore {
    /// Wire every service. The returned receiver carries navigation events.
    pub fn new(
        config: ClientConfig,
        documents: Arc<dyn DocumentStore>,
        realtime: Arc<dyn RealtimeStore>,
        database: Database,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let db: SharedDatabase = Arc::new(Mutex::new(database));
        let auth = Arc::new(AuthSession::new());

        let retry = Arc::new(BackoffTokenSync::new(&config, documents.clone(), clock.clone()));
        let tokens = PushTokens::new(
            &config,
            db.clone(),
            documents.clone(),
            auth.clone(),
            clock.clone(),
            retry,
        );
        let notifications = Arc::new(NotificationDispatcher::new(
            &config,
            sink,
            events.clone(),
            tokens,
            clock.clone(),
        ));

        let core = Self {
            session: SessionExpiryGuard::new(db, clock.clone(), config.session_max_days),
            presence: PresenceTracker::new(
                realtime,
                documents.clone(),
                auth.clone(),
                clock,
                config.presence_mirror,
            ),
            reconciler: ConversationReconciler::new(documents.clone(), config.dedup_key),
            messenger: Messenger::new(documents.clone(), auth.clone()),
            notifications,
            documents,
            auth,
            events,
            config,
        };
        (core, events_rx)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.auth.current_user()
    }

    pub fn session(&self) -> &SessionExpiryGuard {
        &self.session
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn reconciler(&self) -> &ConversationReconciler {
        &self.reconciler
    }

    pub fn notifications(&self) -> &Arc<NotificationDispatcher> {
        &self.notifications
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Called once credentials were verified elsewhere.
    pub async fn login(&self, user_id: &str, email: Option<&str>) -> Result<UserId> {
        let user = self.auth.sign_in(user_id)?;
        self.session.mark_logged_now();

        if let Some(email) = email {
            if let Err(e) = self.messenger.ensure_profile(email, None).await {
                warn!(user = %user, error = %e, "failed to create profile");
            }
        }
        self.reconciler.seed_if_missing(&user).await;
        self.notifications.set_foreground(true);
        self.presence.go_online().await;
        self.notifications.tokens().sync_cached().await;

        info!(user = %user, "login complete");
        Ok(user)
    }

    /// Presence and token are cleared while the user is still known; the
    /// session marker and auth state go last.
    pub async fn logout(&self) {
        self.presence.on_logout().await;
        self.notifications.clear_token_on_logout().await;
        self.session.clear();
        if let Some(user) = self.auth.sign_out() {
            info!(user = %user, "logout complete");
        }
    }

    /// App start or return to the foreground. An expired session is logged
    /// out and reported; returns whether a valid session is active.
    pub async fn resume(&self) -> bool {
        if self.auth.current_user().is_none() {
            return false;
        }
        if self.session.is_expired_default() {
            info!("session expired, logging out");
            self.logout().await;
            emit_event(&self.events, UiEvent::SessionExpired);
            return false;
        }
        self.on_lifecycle(AppLifecycle::Foreground).await;
        true
    }

    pub async fn on_lifecycle(&self, lifecycle: AppLifecycle) {
        self.notifications
            .set_foreground(lifecycle == AppLifecycle::Foreground);
        self.presence.on_lifecycle(lifecycle).await;
    }

    /// The signed-in user's conversations, duplicates removed.
    pub async fn conversations(&self) -> Result<ReconcileOutcome> {
        let user = self.auth.current_user().ok_or(ChatError::NotSignedIn)?;
        Ok(self.reconciler.list_and_reconcile(&user).await)
    }

    pub async fn open_conversation(&self, id: &ConversationId) -> Result<OpenConversation> {
        let user = self.auth.current_user().ok_or(ChatError::NotSignedIn)?;
        if self.documents.get_conversation(id).await?.is_none() {
            return Err(ChatError::ConversationNotFound(id.to_string()));
        }

        let processor = MessageStreamProcessor::new(
            id.clone(),
            user,
            self.documents.clone(),
            self.notifications.clone(),
            self.config.display_offset(),
        );
        let view = ConversationView::open(&self.documents, processor).await?;

        let peer = self.messenger.peer(id).await;
        let peer_presence = match &peer {
            Some(peer) => Some(self.presence.observe(&peer.user_id).await),
            None => None,
        };
        Ok(OpenConversation {
            view,
            peer,
            peer_presence,
        })
    }
}
