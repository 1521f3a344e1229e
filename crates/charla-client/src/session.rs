//! Local session lifetime.
//!
//! A login is valid for a fixed number of days measured on this device's
//! clock only. The marker never leaves the local database, so expiry works
//! offline.

use std::sync::Arc;

use tracing::{debug, warn};

use charla_shared::constants::DAY_MILLIS;

use crate::clock::Clock;
use crate::{lock_db, SharedDatabase};

pub struct SessionExpiryGuard {
    db: SharedDatabase,
    clock: Arc<dyn Clock>,
    max_days: u32,
}

impl SessionExpiryGuard {
    pub fn new(db: SharedDatabase, clock: Arc<dyn Clock>, max_days: u32) -> Self {
        Self {
            db,
            clock,
            max_days,
        }
    }

    /// Record "now" as the login time, replacing any previous marker.
    pub fn mark_logged_now(&self) {
        let now = self.clock.now_millis();
        match lock_db(&self.db).set_login_at(now) {
            Ok(()) => debug!(login_at = now, "session marker written"),
            Err(e) => warn!(error = %e, "failed to write session marker"),
        }
    }

    /// Epoch millis of the last login, if a marker exists.
    pub fn logged_at(&self) -> Option<i64> {
        lock_db(&self.db).login_at().ok().flatten()
    }

    /// True when there is no marker, the marker cannot be read, or the clock
    /// is more than `max_days` away from it in either direction.
    pub fn is_expired(&self, max_days: u32) -> bool {
        let login_at = match lock_db(&self.db).login_at() {
            Ok(Some(at)) => at,
            Ok(None) => return true,
            Err(e) => {
                warn!(error = %e, "failed to read session marker, treating as expired");
                return true;
            }
        };
        let elapsed = self.clock.now_millis().saturating_sub(login_at).saturating_abs();
        elapsed > i64::from(max_days).saturating_mul(DAY_MILLIS)
    }

    pub fn is_expired_default(&self) -> bool {
        self.is_expired(self.max_days)
    }

    pub fn clear(&self) {
        if let Err(e) = lock_db(&self.db).clear_login() {
            warn!(error = %e, "failed to clear session marker");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use charla_store::Database;

    use super::*;
    use crate::clock::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn guard(clock: Arc<ManualClock>) -> SessionExpiryGuard {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        SessionExpiryGuard::new(db, clock, 30)
    }

    #[test]
    fn no_marker_is_expired() {
        let guard = guard(Arc::new(ManualClock::new(0)));
        assert!(guard.is_expired_default());
        assert_eq!(guard.logged_at(), None);
    }

    #[test]
    fn fresh_login_expires_after_max_days() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let guard = guard(clock.clone());

        guard.mark_logged_now();
        assert!(!guard.is_expired_default());

        clock.advance(DAY * 30);
        assert!(!guard.is_expired_default(), "exactly max_days is still valid");

        clock.advance(Duration::from_millis(1));
        assert!(guard.is_expired_default());
        assert!(!guard.is_expired(31));
    }

    #[test]
    fn clock_moved_backwards_counts_too() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let guard = guard(clock.clone());
        guard.mark_logged_now();

        clock.rewind(DAY * 31);
        assert!(guard.is_expired_default());
    }

    #[test]
    fn relogin_and_clear() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let guard = guard(clock.clone());
        guard.mark_logged_now();
        clock.advance(DAY * 40);
        assert!(guard.is_expired_default());

        guard.mark_logged_now();
        assert!(!guard.is_expired_default());

        guard.clear();
        assert!(guard.is_expired_default());
    }

    #[test]
    fn marker_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        let clock = Arc::new(ManualClock::new(5_000));
        {
            let db = Arc::new(Mutex::new(Database::open_at(&path).unwrap()));
            SessionExpiryGuard::new(db, clock.clone(), 30).mark_logged_now();
        }
        let db = Arc::new(Mutex::new(Database::open_at(&path).unwrap()));
        let guard = SessionExpiryGuard::new(db, clock, 30);
        assert_eq!(guard.logged_at(), Some(5_000));
        assert!(!guard.is_expired_default());
    }
}
