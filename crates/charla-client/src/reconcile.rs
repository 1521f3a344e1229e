//! Duplicate conversation cleanup.
//!
//! Two clients opening a conversation at the same time can both create a
//! record. Listing a user's conversations groups the records by a
//! normalization key, keeps one canonical record per group and deletes the
//! rest in the background. The read path never waits for the cleanup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use charla_shared::constants::{BOT_USER_ID, SEED_PREVIEW, SEED_TITLE};
use charla_shared::{ConversationId, UserId};
use charla_store::{ConversationRecord, DocumentStore};

/// How records are grouped before duplicates are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupKey {
    /// Trimmed title, or the record id when the title is blank.
    #[default]
    Title,
    /// Sorted set of participant ids.
    Participants,
    /// Every record is its own group.
    Disabled,
}

impl DedupKey {
    fn key_for(self, record: &ConversationRecord) -> String {
        match self {
            Self::Title => {
                let title = record.title.trim();
                if title.is_empty() {
                    format!("id:{}", record.id)
                } else {
                    format!("title:{title}")
                }
            }
            Self::Participants => {
                let mut ids: Vec<&str> = record.participants.iter().map(UserId::as_str).collect();
                ids.sort_unstable();
                ids.dedup();
                format!("participants:{}", ids.join("\u{1f}"))
            }
            Self::Disabled => format!("id:{}", record.id),
        }
    }
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "participants" => Ok(Self::Participants),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            other => Err(format!("unknown dedup key: {other}")),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::Participants => "participants",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Result of grouping a record set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DedupPlan {
    /// Canonical records in order of first appearance.
    pub keep: Vec<ConversationRecord>,
    pub remove: Vec<ConversationId>,
}

/// A record is preferred when its id is the user's seed id or the pair id of
/// its own two participants.
fn is_canonical_id(record: &ConversationRecord, user: &UserId) -> bool {
    record.id == ConversationId::seed_for(user) || record.pair_id().as_ref() == Some(&record.id)
}

/// Pure grouping step. Within a group the first record with a canonical id
/// wins, otherwise the first record encountered.
pub fn plan(records: Vec<ConversationRecord>, user: &UserId, key: DedupKey) -> DedupPlan {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ConversationRecord>> = HashMap::new();
    for record in records {
        let k = key.key_for(&record);
        if !groups.contains_key(&k) {
            order.push(k.clone());
        }
        groups.entry(k).or_default().push(record);
    }

    let mut plan = DedupPlan::default();
    for k in order {
        let Some(mut group) = groups.remove(&k) else {
            continue;
        };
        let winner = group
            .iter()
            .position(|r| is_canonical_id(r, user))
            .unwrap_or(0);
        let canonical = group.swap_remove(winner);
        plan.remove.extend(
            group
                .into_iter()
                .map(|r| r.id)
                .filter(|id| *id != canonical.id),
        );
        plan.keep.push(canonical);
    }
    plan
}

/// Conversations returned to the caller plus the handle of the detached
/// cleanup, if one was started.
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub conversations: Vec<ConversationRecord>,
    pub cleanup: Option<JoinHandle<()>>,
}

pub struct ConversationReconciler {
    documents: Arc<dyn DocumentStore>,
    key: DedupKey,
}

impl ConversationReconciler {
    pub fn new(documents: Arc<dyn DocumentStore>, key: DedupKey) -> Self {
        Self { documents, key }
    }

    pub fn key(&self) -> DedupKey {
        self.key
    }

    /// Load `user`'s conversations and collapse duplicates. A failed query
    /// yields an empty list.
    pub async fn list_and_reconcile(&self, user: &UserId) -> ReconcileOutcome {
        let records = match self.documents.conversations_for(user).await {
            Ok(records) => records,
            Err(e) => {
                warn!(user = %user, error = %e, "conversation query failed");
                return ReconcileOutcome {
                    conversations: Vec::new(),
                    cleanup: None,
                };
            }
        };

        let DedupPlan { keep, remove } = plan(records, user, self.key);
        debug!(
            user = %user,
            kept = keep.len(),
            duplicates = remove.len(),
            key = %self.key,
            "conversations reconciled"
        );

        let cleanup = (!remove.is_empty()).then(|| {
            let documents = self.documents.clone();
            tokio::spawn(async move {
                match documents.delete_conversations(&remove).await {
                    Ok(()) => info!(count = remove.len(), "deleted duplicate conversations"),
                    Err(e) => warn!(
                        count = remove.len(),
                        error = %e,
                        "failed to delete duplicate conversations"
                    ),
                }
            })
        });

        ReconcileOutcome {
            conversations: keep,
            cleanup,
        }
    }

    /// Create the user's welcome conversation unless it already exists.
    /// Returns whether a record was written.
    pub async fn seed_if_missing(&self, user: &UserId) -> bool {
        let id = ConversationId::seed_for(user);
        match self.documents.get_conversation(&id).await {
            Ok(Some(_)) => return false,
            Ok(None) => {}
            Err(e) => {
                warn!(user = %user, error = %e, "failed to look up welcome conversation");
                return false;
            }
        }

        let mut seed = ConversationRecord::new(
            id.as_str(),
            SEED_TITLE,
            [user.clone(), UserId::from(BOT_USER_ID)],
        );
        seed.last_message = SEED_PREVIEW.to_string();

        match self.documents.put_conversation(&seed).await {
            Ok(()) => {
                info!(user = %user, conversation = %id, "welcome conversation created");
                true
            }
            Err(e) => {
                warn!(user = %user, error = %e, "failed to create welcome conversation");
                false
            }
        }
    }
}
