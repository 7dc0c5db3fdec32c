//! Signed-in identity and per-user aggregate types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An authenticated user, as handed out by the session provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user id; owner of every remote row.
    pub user_id: String,

    /// Sign-in email, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Bearer token for the hosted backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Identity {
    /// Identity without a bearer token (anon-key access only).
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            access_token: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Attach an email.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

// Keep tokens out of logs.
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Aggregate usage counters for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserStats {
    pub total_analyses: u64,
    pub total_prompts: u64,
}

/// User profile row with its aggregate counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub last_analysis: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub stats: UserStats,
}

/// Editable profile fields. `None` leaves a field as it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    /// Update that only sets the display name.
    #[must_use]
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// True when no field would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar_url.is_none()
    }

    /// Copy the set fields onto `profile`.
    pub fn apply_to(&self, profile: &mut UserProfile) {
        if let Some(name) = &self.display_name {
            profile.display_name = Some(name.clone());
        }
        if let Some(url) = &self.avatar_url {
            profile.avatar_url = Some(url.clone());
        }
    }
}

/// One upstream API call, for the usage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub provider: String,
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub credits_used: f64,
    /// Response time in milliseconds.
    pub response_time: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub request_data: Map<String, Value>,
    #[serde(default)]
    pub response_data: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let identity = Identity::new("u-1").with_access_token("secret-token");
        let printed = format!("{identity:?}");
        assert!(printed.contains("u-1"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn profile_update_sets_only_given_fields() {
        let mut profile = UserProfile {
            id: "u-1".to_string(),
            avatar_url: Some("https://example.com/a.png".to_string()),
            ..UserProfile::default()
        };
        let update = ProfileUpdate::display_name("Ada");
        assert!(!update.is_empty());
        update.apply_to(&mut profile);
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://example.com/a.png"));

        let value = serde_json::to_value(&update).unwrap();
        assert!(value.get("avatar_url").is_none());
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn profile_reads_flat_counters() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"id":"u-1","display_name":"Ada","total_analyses":3,"total_prompts":15}"#,
        )
        .unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(profile.stats.total_analyses, 3);
        assert_eq!(profile.stats.total_prompts, 15);
    }
}
