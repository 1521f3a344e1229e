use serde::Serialize;
use tokio::sync::mpsc;

use charla_shared::ConversationId;

pub const EVENT_OPEN_CONVERSATION: &str = "open-conversation";
pub const EVENT_OPEN_HOME: &str = "open-home";
pub const EVENT_SESSION_EXPIRED: &str = "session-expired";

/// Navigation requests for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum UiEvent {
    #[serde(rename_all = "camelCase")]
    OpenConversation { conversation_id: ConversationId },
    OpenHome,
    SessionExpired,
}

impl UiEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenConversation { .. } => EVENT_OPEN_CONVERSATION,
            Self::OpenHome => EVENT_OPEN_HOME,
            Self::SessionExpired => EVENT_SESSION_EXPIRED,
        }
    }
}

pub fn emit_event(tx: &mpsc::UnboundedSender<UiEvent>, event: UiEvent) {
    let name = event.name();
    if let Err(e) = tx.send(event) {
        tracing::error!(event = name, error = %e, "Failed to emit event");
    }
}
