//! # charla-client
//!
//! Client-side services of the Charla messenger, wired on top of the store
//! contracts from `charla-store`:
//!
//! - [`session::SessionExpiryGuard`]: local login validity
//! - [`presence::PresenceTracker`]: online/offline flag with disconnect safety
//! - [`reconcile::ConversationReconciler`]: duplicate conversation cleanup
//! - [`stream::MessageStreamProcessor`] and [`view::ConversationView`]:
//!   live message lists and new-message notifications
//! - [`notifications::NotificationDispatcher`]: local rendering of chat and
//!   push notifications, push token bookkeeping
//! - [`state::ChatCore`]: the glue the UI layer talks to

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod messaging;
pub mod notifications;
pub mod presence;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod stream;
pub mod token_sync;
pub mod view;

use std::sync::{Arc, Mutex, MutexGuard};

use charla_store::Database;
use tracing_subscriber::{fmt, EnvFilter};

pub use error::{ChatError, Result};
pub use state::ChatCore;

/// Local database shared by the services that persist device state.
pub type SharedDatabase = Arc<Mutex<Database>>;

pub(crate) fn lock_db(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("charla_client=debug,charla_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
