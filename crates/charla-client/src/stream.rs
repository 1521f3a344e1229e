//! Message snapshots to display rows and new-message notifications.
//!
//! The store delivers the whole ordered message list on every change. The
//! processor resolves sender names, renders rows and compares the snapshot
//! length with the previous one to find the messages that just arrived.
//! The first snapshot of a session only establishes the baseline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use charla_shared::constants::{ATTACHMENT_MARKER, FALLBACK_DISPLAY_NAME, NEW_MESSAGE_MARKER};
use charla_shared::{ConversationId, MessageId, UserId};
use charla_store::{DocumentStore, MessageRecord};

use crate::notifications::NotificationDispatcher;

/// One rendered message row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub attachment: Option<String>,
    /// `HH:mm` in the display offset; empty while the server timestamp is pending.
    pub time: String,
    pub mine: bool,
}

pub fn format_time(created_at: Option<DateTime<Utc>>, offset: &FixedOffset) -> String {
    created_at
        .map(|at| at.with_timezone(offset).format("%H:%M").to_string())
        .unwrap_or_default()
}

/// Text shown in a notification for `message`.
pub fn notification_body(message: &MessageRecord) -> String {
    if !message.text.is_empty() {
        message.text.clone()
    } else if message.has_attachment() {
        ATTACHMENT_MARKER.to_string()
    } else {
        NEW_MESSAGE_MARKER.to_string()
    }
}

pub struct MessageStreamProcessor {
    conversation: ConversationId,
    viewer: UserId,
    documents: Arc<dyn DocumentStore>,
    notifications: Arc<NotificationDispatcher>,
    offset: FixedOffset,
    previous_count: usize,
    names: HashMap<UserId, String>,
}

impl MessageStreamProcessor {
    pub fn new(
        conversation: ConversationId,
        viewer: UserId,
        documents: Arc<dyn DocumentStore>,
        notifications: Arc<NotificationDispatcher>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            conversation,
            viewer,
            documents,
            notifications,
            offset,
            previous_count: 0,
            names: HashMap::new(),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn previous_count(&self) -> usize {
        self.previous_count
    }

    pub fn cached_name(&self, user: &UserId) -> Option<&str> {
        self.names.get(user).map(String::as_str)
    }

    /// Process one full snapshot and return the rows to display.
    pub async fn on_snapshot(&mut self, messages: Vec<MessageRecord>) -> Vec<UiMessage> {
        self.resolve_names(&messages).await;

        let rows: Vec<UiMessage> = messages.iter().map(|m| self.render(m)).collect();

        let total = messages.len();
        let delta = total.saturating_sub(self.previous_count);
        if self.previous_count > 0 && delta > 0 {
            for message in &messages[total - delta..] {
                if message.sender_id == self.viewer {
                    continue;
                }
                let title = self.display_name(&message.sender_id);
                self.notifications.notify(
                    &title,
                    &notification_body(message),
                    Some(&self.conversation),
                    true,
                );
            }
        }
        debug!(
            conversation = %self.conversation,
            total,
            previous = self.previous_count,
            "snapshot processed"
        );
        self.previous_count = total;
        rows
    }

    /// Look up every sender not yet cached, concurrently. Misses and
    /// failures are cached as the fallback name.
    async fn resolve_names(&mut self, messages: &[MessageRecord]) {
        let missing: Vec<UserId> = messages
            .iter()
            .map(|m| &m.sender_id)
            .filter(|id| !self.names.contains_key(*id))
            .collect::<HashSet<_>>()
            .into_iter()
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }

        let lookups = missing.iter().map(|user| {
            let documents = self.documents.clone();
            async move {
                match documents.get_profile(user).await {
                    Ok(Some(profile)) => profile.resolved_display_name(),
                    Ok(None) => FALLBACK_DISPLAY_NAME.to_string(),
                    Err(e) => {
                        warn!(user = %user, error = %e, "profile lookup failed");
                        FALLBACK_DISPLAY_NAME.to_string()
                    }
                }
            }
        });
        let names = join_all(lookups).await;
        self.names.extend(missing.into_iter().zip(names));
    }

    fn display_name(&self, user: &UserId) -> String {
        self.names
            .get(user)
            .cloned()
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
    }

    fn render(&self, message: &MessageRecord) -> UiMessage {
        UiMessage {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: self.display_name(&message.sender_id),
            text: message.text.clone(),
            attachment: message.attachment.clone(),
            time: format_time(message.created_at, &self.offset),
            mine: message.sender_id == self.viewer,
        }
    }
}
