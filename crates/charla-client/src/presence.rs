//! Online/offline presence.
//!
//! The realtime store holds the authoritative flag under `presence/{uid}`.
//! Going online first registers a server-side "write false on disconnect"
//! action, so a crashed or disconnected client never stays online. Going
//! offline writes false explicitly and then cancels that action.

use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use charla_shared::{AppLifecycle, PresenceState, UserId};
use charla_store::{DocumentStore, PresenceMirror, PresenceSubscription, RealtimeStore};

use crate::auth::AuthProvider;
use crate::clock::Clock;

pub struct PresenceTracker {
    realtime: Arc<dyn RealtimeStore>,
    documents: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    mirror: bool,
    mirror_tx: OnceLock<mpsc::UnboundedSender<(UserId, PresenceMirror)>>,
    state: Mutex<Option<PresenceState>>,
}

impl PresenceTracker {
    pub fn new(
        realtime: Arc<dyn RealtimeStore>,
        documents: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        mirror: bool,
    ) -> Self {
        Self {
            realtime,
            documents,
            auth,
            clock,
            mirror,
            mirror_tx: OnceLock::new(),
            state: Mutex::new(None),
        }
    }

    /// Last state this tracker wrote successfully; `None` before the first
    /// write and after logout.
    pub fn current(&self) -> Option<PresenceState> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_current(&self, state: Option<PresenceState>) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub async fn on_lifecycle(&self, lifecycle: AppLifecycle) {
        match lifecycle {
            AppLifecycle::Foreground => self.go_online().await,
            AppLifecycle::Background => self.go_offline().await,
        }
    }

    pub async fn on_foreground(&self) {
        self.go_online().await;
    }

    pub async fn on_background(&self) {
        self.go_offline().await;
    }

    pub async fn go_online(&self) {
        let Some(user) = self.auth.current_user() else {
            debug!("no signed-in user, skipping go_online");
            return;
        };

        if let Err(e) = self
            .realtime
            .set_on_disconnect(&user, PresenceState::OFFLINE.to_value())
            .await
        {
            warn!(user = %user, error = %e, "failed to register on-disconnect action");
        }

        match self
            .realtime
            .set_presence(&user, PresenceState::ONLINE.to_value())
            .await
        {
            Ok(()) => {
                info!(user = %user, "presence online");
                self.set_current(Some(PresenceState::ONLINE));
            }
            Err(e) => warn!(user = %user, error = %e, "failed to write online presence"),
        }

        self.queue_mirror(user, PresenceState::ONLINE);
    }

    pub async fn go_offline(&self) {
        let Some(user) = self.auth.current_user() else {
            debug!("no signed-in user, skipping go_offline");
            return;
        };
        self.write_offline(&user).await;
    }

    /// Presence side of logout: the user is written offline and the tracker
    /// forgets its last state. Must run before the auth session is cleared.
    pub async fn on_logout(&self) {
        self.clear().await;
    }

    pub async fn clear(&self) {
        let Some(user) = self.auth.current_user() else {
            debug!("no signed-in user, skipping presence clear");
            return;
        };
        self.write_offline(&user).await;
        self.set_current(None);
    }

    async fn write_offline(&self, user: &UserId) {
        match self
            .realtime
            .set_presence(user, PresenceState::OFFLINE.to_value())
            .await
        {
            Ok(()) => {
                info!(user = %user, "presence offline");
                self.set_current(Some(PresenceState::OFFLINE));
            }
            Err(e) => warn!(user = %user, error = %e, "failed to write offline presence"),
        }

        if let Err(e) = self.realtime.cancel_on_disconnect(user).await {
            warn!(user = %user, error = %e, "failed to cancel on-disconnect action");
        }

        self.queue_mirror(user.clone(), PresenceState::OFFLINE);
    }

    /// Best-effort copy into the document store for "last seen" displays.
    /// Writes go through one worker task in the order they were queued, so
    /// the mirror always ends on the latest state. Its outcome never affects
    /// the realtime write.
    fn queue_mirror(&self, user: UserId, state: PresenceState) {
        if !self.mirror {
            return;
        }
        let mirror = PresenceMirror {
            online: state.online,
            last_seen: self.clock.now(),
        };
        let tx = self
            .mirror_tx
            .get_or_init(|| spawn_mirror_worker(self.documents.clone()));
        if tx.send((user, mirror)).is_err() {
            warn!("presence mirror worker stopped, dropping write");
        }
    }

    /// Follow another user's presence. Store errors and unreadable values
    /// show up as offline.
    pub async fn observe(&self, user: &UserId) -> PresenceObserver {
        match self.realtime.watch_presence(user).await {
            Ok(subscription) => PresenceObserver {
                user: user.clone(),
                source: Source::Live(subscription),
            },
            Err(e) => {
                warn!(user = %user, error = %e, "presence watch failed, reporting offline");
                PresenceObserver {
                    user: user.clone(),
                    source: Source::Failed { reported: false },
                }
            }
        }
    }
}

fn spawn_mirror_worker(
    documents: Arc<dyn DocumentStore>,
) -> mpsc::UnboundedSender<(UserId, PresenceMirror)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(UserId, PresenceMirror)>();
    tokio::spawn(async move {
        while let Some((user, mirror)) = rx.recv().await {
            if let Err(e) = documents.merge_presence_mirror(&user, mirror).await {
                warn!(user = %user, error = %e, "failed to mirror presence");
            }
        }
        debug!("presence mirror worker stopped");
    });
    tx
}

enum Source {
    Live(PresenceSubscription),
    Failed { reported: bool },
}

/// Decoded presence updates for one user. Dropping it releases the store
/// listener.
pub struct PresenceObserver {
    user: UserId,
    source: Source,
}

impl PresenceObserver {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Next presence value, or `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<PresenceState> {
        match &mut self.source {
            Source::Live(subscription) => {
                let raw = subscription.recv().await?;
                Some(PresenceState::decode(raw.as_ref()))
            }
            Source::Failed { reported } => {
                if *reported {
                    None
                } else {
                    *reported = true;
                    Some(PresenceState::OFFLINE)
                }
            }
        }
    }
}
