use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{PUSH_TYPE_CHAT_MESSAGE, PUSH_TYPE_SYSTEM};
use crate::error::SharedError;
use crate::types::{ConversationId, UserId};

/// Inbound data-only push message, exactly as delivered by the gateway.
/// Every field is optional; defaults are applied by the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Full message text; `body` may be a truncated preview.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    /// Sender-side epoch millis, carried as a string by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl PushPayload {
    /// Build a payload from the gateway's flat string map.
    pub fn from_data(data: &HashMap<String, String>) -> Result<Self, SharedError> {
        let value = serde_json::to_value(data)
            .map_err(|e| SharedError::Serialization(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| SharedError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, SharedError> {
        serde_json::from_slice(bytes).map_err(|e| SharedError::Serialization(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Missing `type` means a chat message.
    pub fn kind(&self) -> PushKind {
        match self.kind.as_deref() {
            None | Some(PUSH_TYPE_CHAT_MESSAGE) => PushKind::ChatMessage,
            Some(PUSH_TYPE_SYSTEM) => PushKind::System,
            Some(other) => PushKind::Other(other.to_string()),
        }
    }

    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.as_deref().and_then(|t| t.trim().parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushKind {
    ChatMessage,
    System,
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_map() {
        let data: HashMap<String, String> = [
            ("type", "chat_message"),
            ("senderName", "Ana"),
            ("body", "hola"),
            ("conversationId", "dm_u1_u2"),
            ("timestamp", "1700000000000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let payload = PushPayload::from_data(&data).unwrap();
        assert_eq!(payload.kind(), PushKind::ChatMessage);
        assert_eq!(payload.sender_name.as_deref(), Some("Ana"));
        assert_eq!(payload.conversation_id, Some(ConversationId::from("dm_u1_u2")));
        assert_eq!(payload.timestamp_millis(), Some(1_700_000_000_000));
    }

    #[test]
    fn missing_type_is_chat_message() {
        assert_eq!(PushPayload::default().kind(), PushKind::ChatMessage);
        assert!(PushPayload::default().is_empty());
    }

    #[test]
    fn unknown_type_is_kept() {
        let payload = PushPayload::from_json(br#"{"type":"promo","title":"Sale"}"#).unwrap();
        assert_eq!(payload.kind(), PushKind::Other("promo".into()));
        assert!(!payload.is_empty());
    }
}
