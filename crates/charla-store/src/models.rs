//! Records exchanged with the remote stores and the local database.
//!
//! Field names follow the remote document layout (`camelCase`) so the structs
//! can be (de)serialized straight from store documents.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use charla_shared::constants::FALLBACK_DISPLAY_NAME;
use charla_shared::{ConversationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// `conversations/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: ConversationId,
    #[serde(default)]
    pub title: String,
    /// Preview of the most recent message.
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub participants: Vec<UserId>,
}

impl ConversationRecord {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        participants: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            id: ConversationId::new(id),
            title: title.into(),
            last_message: String::new(),
            participants: participants.into_iter().collect(),
        }
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    /// The deterministic pair id, if this is a two-party conversation.
    pub fn pair_id(&self) -> Option<ConversationId> {
        match self.participants.as_slice() {
            [a, b] if a != b => Some(ConversationId::for_pair(a, b)),
            _ => None,
        }
    }

    /// The first participant that is not `me`.
    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != me)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// `conversations/{id}/messages/{id}`. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Empty for attachment-only messages.
    #[serde(default)]
    pub text: String,
    /// Opaque attachment reference (encoded image, blob id...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub sender_id: UserId,
    /// Assigned by the store; absent until the write has been acknowledged.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn has_attachment(&self) -> bool {
        self.attachment.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// A message about to be written. The store assigns id and `createdAt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    pub attachment: Option<String>,
}

/// Store ordering: `createdAt` ascending, ties by id. A message still
/// waiting for its server timestamp is the newest one, so it sorts last.
pub fn sort_messages(messages: &mut [MessageRecord]) {
    messages.sort_by(|a, b| {
        match (a.created_at, b.created_at) {
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (x, y) => x.cmp(&y),
        }
        .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// User profile
// ---------------------------------------------------------------------------

/// `users/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub push_token: Option<String>,
    #[serde(default)]
    pub token_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_info: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

impl UserProfile {
    /// `displayName`, else the local part of the email, else `"User"`.
    pub fn resolved_display_name(&self) -> String {
        if let Some(name) = self.display_name.as_deref().map(str::trim) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
        if let Some(email) = self.email.as_deref() {
            let local = email.split('@').next().unwrap_or_default().trim();
            if !local.is_empty() {
                return local.to_string();
            }
        }
        FALLBACK_DISPLAY_NAME.to_string()
    }
}

/// Merge-write onto `users/{id}`. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// `Some(None)` removes the stored token.
    pub push_token: Option<Option<String>>,
    pub token_updated_at: Option<DateTime<Utc>>,
    pub device_info: Option<String>,
    pub app_version: Option<String>,
    pub platform: Option<String>,
}

impl ProfilePatch {
    pub fn apply(self, profile: &mut UserProfile) {
        if let Some(email) = self.email {
            profile.email = Some(email);
        }
        if let Some(name) = self.display_name {
            profile.display_name = Some(name);
        }
        if let Some(token) = self.push_token {
            profile.push_token = token;
        }
        if let Some(at) = self.token_updated_at {
            profile.token_updated_at = Some(at);
        }
        if let Some(device) = self.device_info {
            profile.device_info = Some(device);
        }
        if let Some(version) = self.app_version {
            profile.app_version = Some(version);
        }
        if let Some(platform) = self.platform {
            profile.platform = Some(platform);
        }
    }
}

// ---------------------------------------------------------------------------
// Presence mirror
// ---------------------------------------------------------------------------

/// `presence/{id}` in the document store, for UIs that show "last seen".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMirror {
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Local-only records
// ---------------------------------------------------------------------------

/// Push token cached on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPushToken {
    pub token: String,
    /// Epoch millis of the last rotation or refresh.
    pub updated_at: i64,
    pub device_info: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(display_name: Option<&str>, email: Option<&str>) -> UserProfile {
        UserProfile {
            id: UserId::from("u1"),
            display_name: display_name.map(str::to_string),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn display_name_falls_back_to_email_then_placeholder() {
        assert_eq!(profile(Some("Ana"), Some("a@x.io")).resolved_display_name(), "Ana");
        assert_eq!(profile(Some("  "), Some("ana@x.io")).resolved_display_name(), "ana");
        assert_eq!(profile(None, Some("@x.io")).resolved_display_name(), "User");
        assert_eq!(profile(None, None).resolved_display_name(), "User");
    }

    #[test]
    fn pair_id_only_for_two_distinct_participants() {
        let dm = ConversationRecord::new("c", "t", [UserId::from("u2"), UserId::from("u1")]);
        assert_eq!(dm.pair_id(), Some(ConversationId::from("dm_u1_u2")));

        let group = ConversationRecord::new(
            "g",
            "t",
            [UserId::from("a"), UserId::from("b"), UserId::from("c")],
        );
        assert_eq!(group.pair_id(), None);
    }

    #[test]
    fn pending_timestamps_sort_last() {
        let msg = |id: &str, at: Option<i64>| MessageRecord {
            id: MessageId::from(id),
            conversation_id: ConversationId::from("c"),
            text: String::new(),
            attachment: None,
            sender_id: UserId::from("u1"),
            created_at: at.and_then(|s| DateTime::from_timestamp(s, 0)),
        };
        let mut list = vec![
            msg("b", Some(20)),
            msg("e", None),
            msg("c", None),
            msg("a", Some(20)),
            msg("d", Some(10)),
        ];
        sort_messages(&mut list);
        let ids: Vec<_> = list.iter().map(|m| m.id.0.as_str()).collect();
        assert_eq!(ids, ["d", "a", "b", "c", "e"]);
    }

    #[test]
    fn patch_can_clear_token() {
        let mut p = UserProfile {
            push_token: Some("tok".into()),
            ..Default::default()
        };
        ProfilePatch {
            push_token: Some(None),
            ..Default::default()
        }
        .apply(&mut p);
        assert_eq!(p.push_token, None);
    }
}
