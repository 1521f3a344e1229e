//! Presence values as they appear in the realtime store.
//!
//! Writers in this workspace only ever store the boolean form, but older
//! clients wrote richer shapes, so every reader goes through
//! [`PresenceState::decode`].

use serde::{Deserialize, Serialize};

/// Every shape accepted under `presence/{uid}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PresenceValue {
    /// `true` / `false`
    Flag(bool),
    /// `{ "online": bool, "lastSeen": ... }`
    Online {
        online: bool,
        #[serde(rename = "lastSeen", default)]
        last_seen: Option<serde_json::Value>,
    },
    /// `{ "state": "online" | "offline" }`
    State { state: String },
}

impl PresenceValue {
    pub fn is_online(&self) -> bool {
        match self {
            Self::Flag(online) => *online,
            Self::Online { online, .. } => *online,
            Self::State { state } => state.eq_ignore_ascii_case("online"),
        }
    }
}

/// Normalized presence of one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub online: bool,
}

impl PresenceState {
    pub const ONLINE: Self = Self { online: true };
    pub const OFFLINE: Self = Self { online: false };

    /// Decode a raw store value. Missing or unrecognised values are offline.
    pub fn decode(raw: Option<&serde_json::Value>) -> Self {
        let Some(raw) = raw else {
            return Self::OFFLINE;
        };
        match PresenceValue::deserialize(raw) {
            Ok(value) => Self {
                online: value.is_online(),
            },
            Err(_) => Self::OFFLINE,
        }
    }

    /// The only shape this workspace writes.
    pub fn to_value(self) -> serde_json::Value {
        serde_json::Value::Bool(self.online)
    }

    pub fn label(self) -> &'static str {
        if self.online {
            "Online"
        } else {
            "Offline"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_all_three_shapes() {
        assert!(PresenceState::decode(Some(&json!(true))).online);
        assert!(!PresenceState::decode(Some(&json!(false))).online);
        assert!(PresenceState::decode(Some(&json!({ "online": true, "lastSeen": 1700000000 }))).online);
        assert!(!PresenceState::decode(Some(&json!({ "online": false }))).online);
        assert!(PresenceState::decode(Some(&json!({ "state": "ONLINE" }))).online);
        assert!(!PresenceState::decode(Some(&json!({ "state": "offline" }))).online);
    }

    #[test]
    fn online_field_wins_over_state() {
        let raw = json!({ "online": true, "state": "offline" });
        assert!(PresenceState::decode(Some(&raw)).online);
    }

    #[test]
    fn unknown_shapes_are_offline() {
        assert_eq!(PresenceState::decode(None), PresenceState::OFFLINE);
        assert_eq!(PresenceState::decode(Some(&json!(null))), PresenceState::OFFLINE);
        assert_eq!(PresenceState::decode(Some(&json!("yes"))), PresenceState::OFFLINE);
        assert_eq!(PresenceState::decode(Some(&json!({ "foo": 1 }))), PresenceState::OFFLINE);
        assert_eq!(PresenceState::decode(Some(&json!({ "online": "true" }))), PresenceState::OFFLINE);
    }
}
