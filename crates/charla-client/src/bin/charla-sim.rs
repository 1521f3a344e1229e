//! # charla-sim
//!
//! Runs two Charla clients against the in-memory stores and walks through a
//! short conversation: login, direct conversation by email, live messages
//! with notifications, presence changes, a remote push and logout.
//!
//! Configuration comes from the usual `CHARLA_*` variables; `RUST_LOG`
//! controls the output.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use charla_client::clock::SystemClock;
use charla_client::config::ClientConfig;
use charla_client::notifications::LogSink;
use charla_client::state::open_database;
use charla_client::ChatCore;
use charla_shared::{AppLifecycle, PushPayload};
use charla_store::{Database, MemoryDocumentStore, MemoryRealtimeStore};

const STEP_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    charla_client::init_tracing();
    info!("Starting Charla simulation v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Shared stores and one client per user
    // -----------------------------------------------------------------------
    let documents = MemoryDocumentStore::new();
    let realtime = MemoryRealtimeStore::new();

    let alice_db = if config.db_path.is_some() {
        open_database(&config).context("opening local database")?
    } else {
        Database::open_in_memory()?
    };
    let (alice, mut alice_events) = ChatCore::new(
        config.clone(),
        Arc::new(documents.clone()),
        Arc::new(realtime.clone()),
        alice_db,
        Arc::new(LogSink),
        Arc::new(SystemClock),
    );
    let (bob, _bob_events) = ChatCore::new(
        config.clone(),
        Arc::new(documents.clone()),
        Arc::new(realtime.clone()),
        Database::open_in_memory()?,
        Arc::new(LogSink),
        Arc::new(SystemClock),
    );

    let alice_id = alice.login("alice", Some("alice@example.org")).await?;
    let bob_id = bob.login("bob", Some("bob@example.org")).await?;

    // -----------------------------------------------------------------------
    // 3. Direct conversation, opened from both sides
    // -----------------------------------------------------------------------
    let conversation = alice
        .messenger()
        .open_direct_by_email("bob@example.org")
        .await?;
    info!(conversation = %conversation.id, title = %conversation.title, "direct conversation ready");

    let outcome = bob.conversations().await?;
    info!(count = outcome.conversations.len(), "bob's conversations");

    let mut open = alice.open_conversation(&conversation.id).await?;
    let rows = tokio::time::timeout(STEP_TIMEOUT, open.view.next())
        .await
        .context("waiting for the first snapshot")?
        .unwrap_or_default();
    info!(rows = rows.len(), "initial snapshot");

    // Alice switches away; Bob's messages now notify with high priority.
    alice.on_lifecycle(AppLifecycle::Background).await;

    alice
        .messenger()
        .send_message(&conversation.id, "Hi Bob!", None)
        .await?;
    bob.messenger()
        .send_message(&conversation.id, "Hey Alice", None)
        .await?;
    bob.messenger()
        .send_message(&conversation.id, "", Some("blob:holiday.jpg".to_string()))
        .await?;

    let mut seen = 0;
    while seen < 3 {
        let rows = tokio::time::timeout(STEP_TIMEOUT, open.view.next())
            .await
            .context("waiting for new messages")?
            .unwrap_or_default();
        seen = rows.len();
        for row in &rows {
            info!(time = %row.time, from = %row.sender_name, text = %row.text, "row");
        }
    }

    // -----------------------------------------------------------------------
    // 4. Presence
    // -----------------------------------------------------------------------
    if let Some(presence) = open.peer_presence.as_mut() {
        let state = presence.next().await.unwrap_or_default();
        info!(user = %bob_id, state = state.label(), "peer presence");

        bob.on_lifecycle(AppLifecycle::Background).await;
        let state = presence.next().await.unwrap_or_default();
        info!(user = %bob_id, state = state.label(), "peer presence");
    }

    // Bob comes back, then loses his connection without saying goodbye.
    bob.on_lifecycle(AppLifecycle::Foreground).await;
    realtime.disconnect(&bob_id);
    info!(value = ?realtime.value(&bob_id), "bob after dropped connection");

    // -----------------------------------------------------------------------
    // 5. Remote push and token rotation
    // -----------------------------------------------------------------------
    let data: HashMap<String, String> = [
        ("type", "chat_message"),
        ("senderName", "Bob"),
        ("body", "Are you there?"),
        ("conversationId", conversation.id.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let payload = PushPayload::from_data(&data)?;
    if let Some(notification) = alice.notifications().on_remote_push(&payload) {
        alice.notifications().on_tap(&notification);
    }
    if let Ok(event) = alice_events.try_recv() {
        info!(event = event.name(), "navigation event");
    }

    let outcome = alice.notifications().on_token_rotated("sim-token-1").await;
    info!(?outcome, stale = alice.notifications().is_token_stale(), "push token");

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    open.view.close().await;
    alice.logout().await;
    bob.logout().await;
    info!(
        alice = ?realtime.value(&alice_id),
        bob = ?realtime.value(&bob_id),
        "final presence"
    );

    Ok(())
}
