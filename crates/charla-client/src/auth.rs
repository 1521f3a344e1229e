//! The signed-in user, as far as the client services are concerned.
//!
//! Credential handling lives outside this crate; whatever performs it reports
//! the resulting user id through [`AuthSession::sign_in`].

use std::sync::RwLock;

use charla_shared::UserId;

use crate::error::Result;

/// Supplies the current user id, if any.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

#[derive(Debug, Default)]
pub struct AuthSession {
    user: RwLock<Option<UserId>>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user_id: &str) -> Result<UserId> {
        let user = UserId::parse(user_id)?;
        *self.user.write().unwrap_or_else(|p| p.into_inner()) = Some(user.clone());
        tracing::info!(user = %user, "signed in");
        Ok(user)
    }

    /// Returns the user that was signed in, if any.
    pub fn sign_out(&self) -> Option<UserId> {
        let previous = self.user.write().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(user) = &previous {
            tracing::info!(user = %user, "signed out");
        }
        previous
    }
}

impl AuthProvider for AuthSession {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
