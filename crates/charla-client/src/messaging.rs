//! Sending messages and opening direct conversations.
//!
//! Unlike the side channels, these operations report failures to the caller:
//! a message that was not stored must not look sent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use charla_shared::constants::{ATTACHMENT_MARKER, FALLBACK_DISPLAY_NAME};
use charla_shared::{ConversationId, UserId};
use charla_store::{ConversationRecord, DocumentStore, MessageRecord, NewMessage, ProfilePatch};

use crate::auth::AuthProvider;
use crate::error::{ChatError, Result};

/// The other side of a two-party conversation, for the conversation header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub user_id: UserId,
    pub display_name: String,
}

pub struct Messenger {
    documents: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
}

impl Messenger {
    pub fn new(documents: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { documents, auth }
    }

    fn me(&self) -> Result<UserId> {
        self.auth.current_user().ok_or(ChatError::NotSignedIn)
    }

    /// Store a message from the signed-in user. Text is trimmed; a message
    /// needs text or an attachment. The conversation preview is updated
    /// afterwards, best-effort.
    pub async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
        attachment: Option<String>,
    ) -> Result<MessageRecord> {
        let sender = self.me()?;
        let text = text.trim();
        let attachment = attachment.filter(|a| !a.is_empty());
        if text.is_empty() && attachment.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let record = self
            .documents
            .add_message(NewMessage {
                conversation_id: conversation.clone(),
                sender_id: sender,
                text: text.to_string(),
                attachment,
            })
            .await?;
        debug!(conversation = %conversation, message = %record.id, "message stored");

        let preview = if record.text.is_empty() {
            ATTACHMENT_MARKER
        } else {
            record.text.as_str()
        };
        if let Err(e) = self.documents.set_last_message(conversation, preview).await {
            warn!(conversation = %conversation, error = %e, "failed to update conversation preview");
        }
        Ok(record)
    }

    /// Create the signed-in user's profile document if it does not exist.
    pub async fn ensure_profile(&self, email: &str, display_name: Option<&str>) -> Result<()> {
        let me = self.me()?;
        if self.documents.get_profile(&me).await?.is_some() {
            return Ok(());
        }
        let email = email.trim().to_lowercase();
        let display_name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        self.documents
            .merge_profile(
                &me,
                ProfilePatch {
                    email: Some(email),
                    display_name: Some(display_name),
                    ..Default::default()
                },
            )
            .await?;
        info!(user = %me, "profile created");
        Ok(())
    }

    /// Find or create the direct conversation with the user registered
    /// under `email`. The record uses the deterministic pair id, so both
    /// sides converge on the same document.
    pub async fn open_direct_by_email(&self, email: &str) -> Result<ConversationRecord> {
        let me = self.me()?;
        let email = email.trim().to_lowercase();
        if !looks_like_email(&email) {
            return Err(ChatError::InvalidEmail(email));
        }

        let other = self
            .documents
            .find_user_by_email(&email)
            .await?
            .ok_or_else(|| ChatError::UserNotFound(email.clone()))?;
        if other.id == me {
            return Err(ChatError::SelfConversation);
        }

        let id = ConversationId::for_pair(&me, &other.id);
        if let Some(existing) = self.documents.get_conversation(&id).await? {
            return Ok(existing);
        }

        let record = ConversationRecord::new(
            id.as_str(),
            format!("Chat with {email}"),
            [me, other.id],
        );
        self.documents.put_conversation(&record).await?;
        info!(conversation = %id, "direct conversation created");
        Ok(record)
    }

    /// The other participant of `conversation` and their display name.
    /// `None` when the conversation cannot be read or has no one else.
    pub async fn peer(&self, conversation: &ConversationId) -> Option<Peer> {
        let me = self.auth.current_user()?;
        let record = match self.documents.get_conversation(conversation).await {
            Ok(record) => record?,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "failed to load conversation");
                return None;
            }
        };
        let user_id = record.other_participant(&me)?.clone();
        let display_name = match self.documents.get_profile(&user_id).await {
            Ok(Some(profile)) => profile.resolved_display_name(),
            Ok(None) => FALLBACK_DISPLAY_NAME.to_string(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "profile lookup failed");
                FALLBACK_DISPLAY_NAME.to_string()
            }
        };
        Some(Peer {
            user_id,
            display_name,
        })
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use charla_store::{Fault, MemoryDocumentStore, StoreError, UserProfile};

    use super::*;
    use crate::auth::AuthSession;

    fn u(id: &str) -> UserId {
        UserId::from(id)
    }

    fn setup(signed_in: bool) -> (MemoryDocumentStore, Messenger) {
        let store = MemoryDocumentStore::new();
        store.insert_conversation(ConversationRecord::new("dm_u1_u2", "Chat", [u("u1"), u("u2")]));
        store.insert_profile(UserProfile {
            id: u("u2"),
            email: Some("ana@x.io".into()),
            display_name: Some("Ana".into()),
            ..Default::default()
        });
        let auth = if signed_in {
            AuthSession::signed_in(u("u1"))
        } else {
            AuthSession::new()
        };
        let messenger = Messenger::new(Arc::new(store.clone()), Arc::new(auth));
        (store, messenger)
    }

    #[tokio::test]
    async fn send_trims_and_updates_preview() {
        let (store, messenger) = setup(true);
        let conv = ConversationId::from("dm_u1_u2");
        let record = messenger.send_message(&conv, "  hola  ", None).await.unwrap();

        assert_eq!(record.text, "hola");
        assert_eq!(record.sender_id, u("u1"));
        assert_eq!(store.messages(&conv).len(), 1);
        assert_eq!(store.conversation(&conv).unwrap().last_message, "hola");
    }

    #[tokio::test]
    async fn attachment_only_message_uses_marker_preview() {
        let (store, messenger) = setup(true);
        let conv = ConversationId::from("dm_u1_u2");
        messenger
            .send_message(&conv, "", Some("blob:1".into()))
            .await
            .unwrap();
        assert_eq!(store.conversation(&conv).unwrap().last_message, ATTACHMENT_MARKER);
    }

    #[tokio::test]
    async fn send_rejects_empty_and_anonymous() {
        let (_, messenger) = setup(true);
        let conv = ConversationId::from("dm_u1_u2");
        assert!(matches!(
            messenger.send_message(&conv, "   ", None).await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(matches!(
            messenger.send_message(&conv, "", Some(String::new())).await,
            Err(ChatError::EmptyMessage)
        ));

        let (store, anonymous) = setup(false);
        assert!(matches!(
            anonymous.send_message(&conv, "hola", None).await,
            Err(ChatError::NotSignedIn)
        ));
        assert!(store.messages(&conv).is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_visible() {
        let (store, messenger) = setup(true);
        store.inject(Fault::MessageWrite);
        let conv = ConversationId::from("dm_u1_u2");
        let err = messenger.send_message(&conv, "hola", None).await.unwrap_err();
        assert!(matches!(err, ChatError::Store(StoreError::Unavailable(_))));
        assert_eq!(store.conversation(&conv).unwrap().last_message, "");
    }

    #[tokio::test]
    async fn ensure_profile_creates_once() {
        let (store, messenger) = setup(true);
        messenger.ensure_profile(" Luis@X.io ", None).await.unwrap();
        let profile = store.profile(&u("u1")).unwrap();
        assert_eq!(profile.email.as_deref(), Some("luis@x.io"));
        assert_eq!(profile.display_name.as_deref(), Some("luis"));

        messenger.ensure_profile("other@x.io", Some("Other")).await.unwrap();
        assert_eq!(store.profile(&u("u1")).unwrap().display_name.as_deref(), Some("luis"));
    }

    #[tokio::test]
    async fn open_direct_reuses_pair_record() {
        let (store, messenger) = setup(true);
        let existing = messenger.open_direct_by_email("ANA@x.io").await.unwrap();
        assert_eq!(existing.id, ConversationId::from("dm_u1_u2"));
        assert_eq!(existing.title, "Chat");
        assert_eq!(store.conversation_ids().len(), 1);
    }

    #[tokio::test]
    async fn open_direct_creates_pair_record() {
        let (store, messenger) = setup(true);
        store.insert_profile(UserProfile {
            id: u("u0"),
            email: Some("zoe@x.io".into()),
            ..Default::default()
        });
        let created = messenger.open_direct_by_email("zoe@x.io").await.unwrap();
        assert_eq!(created.id, ConversationId::from("dm_u0_u1"));
        assert_eq!(created.title, "Chat with zoe@x.io");
        assert!(created.has_participant(&u("u0")));
        assert!(store.conversation(&created.id).is_some());
    }

    #[tokio::test]
    async fn open_direct_errors() {
        let (store, messenger) = setup(true);
        store.insert_profile(UserProfile {
            id: u("u1"),
            email: Some("me@x.io".into()),
            ..Default::default()
        });
        assert!(matches!(
            messenger.open_direct_by_email("not-an-email").await,
            Err(ChatError::InvalidEmail(_))
        ));
        assert!(matches!(
            messenger.open_direct_by_email("ghost@x.io").await,
            Err(ChatError::UserNotFound(_))
        ));
        assert!(matches!(
            messenger.open_direct_by_email("me@x.io").await,
            Err(ChatError::SelfConversation)
        ));
    }

    #[tokio::test]
    async fn peer_resolves_other_participant() {
        let (_, messenger) = setup(true);
        let peer = messenger
            .peer(&ConversationId::from("dm_u1_u2"))
            .await
            .unwrap();
        assert_eq!(peer.user_id, u("u2"));
        assert_eq!(peer.display_name, "Ana");
        assert!(messenger.peer(&ConversationId::from("missing")).await.is_none());
    }
}
