//! Authenticated session boundary.
//!
//! Sign-in flows and credential storage live outside this crate. The sync
//! engine only asks a [`SessionProvider`] whether a usable session exists.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::{normalize_text_option, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    /// Unix seconds; `None` for tokens without a known expiry
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
            user: AuthUser {
                id: user_id.into(),
                email: None,
            },
        }
    }

    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS)
    }

    /// A session is usable when it has a token, a user, and has not expired.
    pub fn is_usable(&self) -> bool {
        !self.access_token.trim().is_empty()
            && !self.user.id.trim().is_empty()
            && !self.is_expired()
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Source of the current authenticated session.
#[allow(async_fn_in_trait)]
pub trait SessionProvider {
    /// The current session, if any. Expired sessions may be returned; the
    /// engines check [`AuthSession::is_usable`] themselves.
    async fn current_session(&self) -> Option<AuthSession>;
}

/// Session provider backed by a fixed, replaceable session.
#[derive(Clone, Debug, Default)]
pub struct StaticSessionProvider {
    session: std::sync::Arc<tokio::sync::RwLock<Option<AuthSession>>>,
}

impl StaticSessionProvider {
    pub fn new(session: Option<AuthSession>) -> Self {
        Self {
            session: std::sync::Arc::new(tokio::sync::RwLock::new(session)),
        }
    }

    /// Build a session from raw token/user values, e.g. environment variables.
    ///
    /// Returns a provider without a session when either value is blank.
    pub fn from_parts(
        access_token: Option<String>,
        user_id: Option<String>,
        expires_at: Option<i64>,
    ) -> Self {
        let session = match (
            normalize_text_option(access_token),
            normalize_text_option(user_id),
        ) {
            (Some(token), Some(user_id)) => {
                let session = AuthSession::new(token, user_id);
                Some(match expires_at {
                    Some(expires_at) => session.with_expires_at(expires_at),
                    None => session,
                })
            }
            _ => None,
        };
        Self::new(session)
    }

    /// Replace the session, e.g. after sign-in or sign-out.
    pub async fn replace(&self, session: Option<AuthSession>) {
        *self.session.write().await = session;
    }
}

impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession::new("secret-access-token", "user");
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn session_without_expiry_never_expires() {
        let session = AuthSession::new("token", "user");
        assert!(!session.is_expired());
        assert!(session.is_usable());
    }

    #[test]
    fn session_within_skew_counts_as_expired() {
        let session = AuthSession::new("token", "user").with_expires_at(unix_timestamp_now() + 30);
        assert!(session.is_expired());
        assert!(!session.is_usable());
    }

    #[tokio::test]
    async fn from_parts_requires_token_and_user() {
        let provider =
            StaticSessionProvider::from_parts(Some("  ".to_string()), Some("u".to_string()), None);
        assert!(provider.current_session().await.is_none());

        let provider = StaticSessionProvider::from_parts(
            Some("token".to_string()),
            Some(" u1 ".to_string()),
            None,
        );
        let session = provider.current_session().await.unwrap();
        assert_eq!(session.user.id, "u1");
    }

    #[tokio::test]
    async fn replace_swaps_the_session() {
        let provider = StaticSessionProvider::new(None);
        provider
            .replace(Some(AuthSession::new("token", "user")))
            .await;
        assert!(provider.current_session().await.is_some());
        provider.replace(None).await;
        assert!(provider.current_session().await.is_none());
    }
}
