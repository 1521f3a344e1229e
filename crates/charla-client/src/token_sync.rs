//! Bounded retries for push token upserts that failed inline.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use charla_store::DocumentStore;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::notifications::{TokenRetryQueue, TokenSyncJob};

/// Retries each job on its own task with exponential backoff:
/// `base`, `2 * base`, `4 * base`... between attempts.
#[derive(Clone)]
pub struct BackoffTokenSync {
    documents: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    base_delay: Duration,
}

impl BackoffTokenSync {
    pub fn new(
        config: &ClientConfig,
        documents: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            clock,
            max_attempts: config.token_retry_attempts.max(1),
            base_delay: config.token_retry_base_delay,
        }
    }

    fn delay_before(&self, attempt: u32) -> Duration {
        // attempt is 1-based; the first retry waits `base_delay`.
        let factor = 2u32.saturating_pow(attempt.saturating_sub(2));
        self.base_delay.saturating_mul(factor)
    }

    /// Run every attempt in place. Returns whether the token was stored.
    pub async fn run(&self, job: TokenSyncJob) -> bool {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.delay_before(attempt)).await;
            }
            match self
                .documents
                .merge_profile(&job.user, job.patch(self.clock.now()))
                .await
            {
                Ok(()) => {
                    info!(user = %job.user, attempt, "push token synced on retry");
                    return true;
                }
                Err(e) => warn!(
                    user = %job.user,
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "push token retry failed"
                ),
            }
        }
        error!(
            user = %job.user,
            attempts = self.max_attempts,
            "giving up on push token sync"
        );
        false
    }
}

impl TokenRetryQueue for BackoffTokenSync {
    fn enqueue(&self, job: TokenSyncJob) {
        let Ok(handle) = Handle::try_current() else {
            error!(user = %job.user, "no async runtime, dropping push token retry");
            return;
        };
        let worker = self.clone();
        handle.spawn(async move {
            worker.run(job).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use charla_shared::UserId;
    use charla_store::{Fault, MemoryDocumentStore};

    use super::*;
    use crate::clock::ManualClock;

    fn job() -> TokenSyncJob {
        TokenSyncJob {
            user: UserId::from("u1"),
            token: "tok".into(),
            device_info: "linux x86_64".into(),
            app_version: "0.1.0".into(),
            platform: "rust".into(),
        }
    }

    fn worker(store: &MemoryDocumentStore, attempts: u32) -> BackoffTokenSync {
        let config = ClientConfig {
            token_retry_attempts: attempts,
            token_retry_base_delay: Duration::from_millis(1),
            ..ClientConfig::default()
        };
        BackoffTokenSync::new(&config, Arc::new(store.clone()), Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn delays_double_from_base() {
        let config = ClientConfig::default();
        let w = BackoffTokenSync::new(
            &config,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(w.delay_before(2), Duration::from_secs(2));
        assert_eq!(w.delay_before(3), Duration::from_secs(4));
        assert_eq!(w.delay_before(4), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn first_attempt_stores_token() {
        let store = MemoryDocumentStore::new();
        assert!(worker(&store, 3).run(job()).await);
        assert!(store.profile(&UserId::from("u1")).is_some());
    }

    #[tokio::test]
    async fn succeeds_when_store_recovers() {
        let store = MemoryDocumentStore::new();
        store.inject(Fault::ProfileWrite);
        let config = ClientConfig {
            token_retry_attempts: 3,
            token_retry_base_delay: Duration::from_millis(40),
            ..ClientConfig::default()
        };
        let w = BackoffTokenSync::new(
            &config,
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(0)),
        );

        let healer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            healer.heal(Fault::ProfileWrite);
        });

        assert!(w.run(job()).await);
        let profile = store.profile(&UserId::from("u1")).unwrap();
        assert_eq!(profile.push_token.as_deref(), Some("tok"));
        assert_eq!(profile.app_version.as_deref(), Some("0.1.0"));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let store = MemoryDocumentStore::new();
        store.inject(Fault::ProfileWrite);
        assert!(!worker(&store, 3).run(job()).await);
        assert!(store.profile(&UserId::from("u1")).is_none());
    }

    #[tokio::test]
    async fn enqueue_runs_in_background() {
        let store = MemoryDocumentStore::new();
        worker(&store, 2).enqueue(job());
        for _ in 0..100 {
            if store.profile(&UserId::from("u1")).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(store.profile(&UserId::from("u1")).is_some());
    }

    #[test]
    fn enqueue_without_runtime_is_dropped() {
        let store = MemoryDocumentStore::new();
        worker(&store, 1).enqueue(job());
        assert!(store.profile(&UserId::from("u1")).is_none());
    }
}
