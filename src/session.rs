//! Session and identity provider.
//!
//! Holds the current signed-in identity, broadcasts changes to subscribers
//! and optionally persists the identity to local storage so a later process
//! starts signed in.

use crate::config::RemoteConfig;
use crate::core::Identity;
use crate::error::{Error, Result};
use crate::storage::LocalAdapter;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Source of the current identity and its change notifications.
///
/// Clones share state.
#[derive(Clone)]
pub struct SessionProvider {
    current: Arc<watch::Sender<Option<Identity>>>,
    persist_to: Option<LocalAdapter>,
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("current", &*self.current.borrow())
            .field("persistent", &self.persist_to.is_some())
            .finish()
    }
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider {
    /// Anonymous, in-memory session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Arc::new(watch::Sender::new(None)),
            persist_to: None,
        }
    }

    /// Session restored from, and saved to, local storage.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read.
    pub fn persistent(local: LocalAdapter) -> Result<Self> {
        let restored = local.load_identity()?;
        Ok(Self {
            current: Arc::new(watch::Sender::new(restored)),
            persist_to: Some(local),
        })
    }

    /// The signed-in identity, if any.
    #[must_use]
    pub fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    /// Whether an identity is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Receiver that wakes on every identity change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    /// Switch to `identity`. Subscribers are notified only if it differs
    /// from the current one.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be persisted. The in-memory
    /// switch still happens.
    pub fn sign_in(&self, identity: Identity) -> Result<()> {
        info!(user_id = %identity.user_id, "signed in");
        self.replace(Some(identity))
    }

    /// Return to anonymous.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted identity cannot be cleared. The
    /// in-memory switch still happens.
    pub fn sign_out(&self) -> Result<()> {
        info!("signed out");
        self.replace(None)
    }

    fn replace(&self, next: Option<Identity>) -> Result<()> {
        let persisted = next.clone();
        self.current.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if let Some(local) = &self.persist_to {
            local.save_identity(persisted.as_ref())?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Sign-up response: a session when the account is usable right away,
/// otherwise the bare user awaiting email confirmation.
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl SignUpResponse {
    fn into_identity(self, email: &str) -> Option<Identity> {
        let token = self.access_token?;
        let user = self.user?;
        let mut identity = Identity::new(user.id).with_access_token(token);
        identity.email = user.email.or_else(|| Some(email.to_string()));
        Some(identity)
    }
}

/// Email/password sign-in against the hosted auth endpoint.
#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl AuthClient {
    /// Build a client from remote configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no remote URL is configured or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        if !config.is_enabled() {
            return Err(Error::Config("remote.url is not set".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            client,
        })
    }

    /// Exchange credentials for an identity.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the credentials are rejected, or an HTTP error.
    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Identity> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("sign-in failed ({status}): {body}")));
        }

        let token: TokenResponse = response.json().await?;
        let mut identity = Identity::new(token.user.id).with_access_token(token.access_token);
        identity.email = token.user.email.or_else(|| Some(email.to_string()));
        Ok(identity)
    }

    /// Register an account. `display_name` travels as user metadata.
    ///
    /// Returns the new identity when the backend signs the user in at once,
    /// `None` when the email must be confirmed first.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if registration is rejected, or an HTTP error.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Option<Identity>> {
        let response = self
            .client
            .post(format!("{}/auth/v1/signup", self.base_url))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("sign-up failed ({status}): {body}")));
        }

        let created: SignUpResponse = response.json().await?;
        let identity = created.into_identity(email);
        info!(confirmed = identity.is_some(), "account created");
        Ok(identity)
    }

    /// Revoke the identity's token. Failures are logged and ignored.
    pub async fn sign_out(&self, identity: &Identity) {
        let Some(token) = &identity.access_token else {
            return;
        };
        let result = self
            .client
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "token revocation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    #[test]
    fn starts_anonymous() {
        let session = SessionProvider::new();
        assert!(!session.is_authenticated());
        assert!(session.current_identity().is_none());
    }

    #[test]
    fn sign_in_and_out_notify_subscribers() {
        let session = SessionProvider::new();
        let mut rx = session.subscribe();

        session.sign_in(Identity::new("u-1")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().user_id, "u-1");

        session.sign_out().unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_none());
    }

    #[test]
    fn same_identity_does_not_notify() {
        let session = SessionProvider::new();
        session.sign_in(Identity::new("u-1")).unwrap();
        let mut rx = session.subscribe();
        rx.borrow_and_update();

        session.sign_in(Identity::new("u-1")).unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn clones_share_state() {
        let session = SessionProvider::new();
        let other = session.clone();
        session.sign_in(Identity::new("u-1")).unwrap();
        assert!(other.is_authenticated());
    }

    #[test]
    fn persistent_session_survives_restart() {
        let local = LocalAdapter::new(Arc::new(MemoryKeyValueStore::new()));

        let first = SessionProvider::persistent(local.clone()).unwrap();
        first.sign_in(Identity::new("u-1")).unwrap();

        let restarted = SessionProvider::persistent(local.clone()).unwrap();
        assert_eq!(restarted.current_identity().unwrap().user_id, "u-1");

        restarted.sign_out().unwrap();
        let again = SessionProvider::persistent(local).unwrap();
        assert!(!again.is_authenticated());
    }

    #[test]
    fn sign_up_with_session_yields_identity() {
        let response: SignUpResponse = serde_json::from_value(serde_json::json!({
            "access_token": "tok",
            "token_type": "bearer",
            "user": {"id": "u-9", "email": "ada@example.com"}
        }))
        .unwrap();
        let identity = response.into_identity("ada@example.com").unwrap();
        assert_eq!(identity.user_id, "u-9");
        assert_eq!(identity.access_token.as_deref(), Some("tok"));
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn unconfirmed_sign_up_has_no_identity() {
        let response: SignUpResponse = serde_json::from_value(serde_json::json!({
            "id": "u-9",
            "email": "ada@example.com",
            "confirmation_sent_at": "2025-07-01T10:00:00Z"
        }))
        .unwrap();
        assert!(response.into_identity("ada@example.com").is_none());
    }

    #[test]
    fn auth_client_requires_url() {
        let config = RemoteConfig::default();
        assert!(matches!(
            AuthClient::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
