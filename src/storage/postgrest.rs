//! Hosted backend over a PostgREST-style HTTP API.

use crate::config::RemoteConfig;
use crate::core::{
    ApiUsage, GeneratedContent, HistoryEntry, Identity, NewHistoryEntry, ProfileUpdate,
    SettingRow, UserProfile, UserStats,
};
use crate::error::{Error, Result};
use crate::storage::traits::RemoteBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// History entries table.
pub const HISTORY_TABLE: &str = "analysis_history_rp2025";
/// Settings key/value table.
pub const SETTINGS_TABLE: &str = "user_settings_rp2025";
/// User profile and counters table.
pub const USERS_TABLE: &str = "users_rp2025";
/// API usage log table.
pub const USAGE_TABLE: &str = "api_usage_rp2025";

/// HTTP client for the hosted tables.
#[derive(Debug, Clone)]
pub struct PostgrestBackend {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl PostgrestBackend {
    /// Build a backend from remote configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no URL is configured or the HTTP client cannot be
    /// built.
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

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    /// Request with API key and bearer token set.
    fn request(&self, method: Method, table: &str, identity: &Identity) -> RequestBuilder {
        let token = identity.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Backend(format!("{status}: {body}")))
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = Self::send(builder).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("unexpected response shape: {e}")))
    }
}

fn owner_filter(identity: &Identity) -> (&'static str, String) {
    ("user_id", format!("eq.{}", identity.user_id))
}

/// History row as stored by the backend.
#[derive(Debug, Deserialize)]
struct HistoryRow {
    id: Value,
    created_at: DateTime<Utc>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_name: Option<String>,
    #[serde(default)]
    image_size: Option<u64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    colors: Option<Vec<String>>,
    #[serde(default)]
    prompts: Option<Vec<GeneratedContent>>,
    #[serde(default)]
    template_params: Option<Map<String, Value>>,
    #[serde(default)]
    analysis_data: Option<Map<String, Value>>,
    #[serde(default)]
    processing_time: Option<u64>,
    #[serde(default)]
    credits_used: Option<f64>,
    #[serde(default)]
    analysis_provider: Option<String>,
    #[serde(default)]
    prompt_provider: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> HistoryEntry {
        let defaults = NewHistoryEntry::default();
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        HistoryEntry::new(
            id,
            self.created_at,
            NewHistoryEntry {
                image_url: self.image_url,
                image_name: self.image_name.unwrap_or_default(),
                image_size: self.image_size,
                description: self.description.unwrap_or_default(),
                tags: self.tags.unwrap_or_default(),
                colors: self.colors.unwrap_or_default(),
                prompts: self.prompts.unwrap_or_default(),
                template_params: self.template_params.unwrap_or_default(),
                analysis_data: self.analysis_data.unwrap_or_default(),
                processing_time: self.processing_time,
                credits_used: self.credits_used.unwrap_or_default(),
                analysis_provider: self
                    .analysis_provider
                    .unwrap_or(defaults.analysis_provider),
                prompt_provider: self.prompt_provider.unwrap_or(defaults.prompt_provider),
            },
        )
    }
}

/// History row as inserted.
#[derive(Debug, Serialize)]
struct InsertHistoryRow<'a> {
    user_id: &'a str,
    image_name: &'a str,
    image_url: Option<&'a str>,
    image_size: Option<u64>,
    description: &'a str,
    tags: &'a [String],
    colors: &'a [String],
    analysis_data: &'a Map<String, Value>,
    prompts: &'a [GeneratedContent],
    template_params: &'a Map<String, Value>,
    analysis_provider: &'a str,
    prompt_provider: &'a str,
    processing_time: Option<u64>,
    credits_used: f64,
}

impl<'a> InsertHistoryRow<'a> {
    fn new(identity: &'a Identity, entry: &'a NewHistoryEntry) -> Self {
        Self {
            user_id: &identity.user_id,
            image_name: &entry.image_name,
            image_url: entry.image_url.as_deref(),
            image_size: entry.image_size,
            description: &entry.description,
            tags: &entry.tags,
            colors: &entry.colors,
            analysis_data: &entry.analysis_data,
            prompts: &entry.prompts,
            template_params: &entry.template_params,
            analysis_provider: &entry.analysis_provider,
            prompt_provider: &entry.prompt_provider,
            processing_time: entry.processing_time,
            credits_used: entry.credits_used,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertSettingRow<'a> {
    user_id: &'a str,
    category: &'a str,
    key: &'a str,
    value: &'a Value,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StatsUpdate {
    total_analyses: u64,
    total_prompts: u64,
    updated_at: DateTime<Utc>,
}

/// Profile row as upserted on account creation.
#[derive(Debug, Serialize)]
struct ProfileRow<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(flatten)]
    fields: &'a ProfileUpdate,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ProfilePatch<'a> {
    #[serde(flatten)]
    update: &'a ProfileUpdate,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct UsageRow<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    usage: &'a ApiUsage,
}

#[async_trait]
impl RemoteBackend for PostgrestBackend {
    async fn load_history(&self, identity: &Identity, limit: usize) -> Result<Vec<HistoryEntry>> {
        let rows: Vec<HistoryRow> = Self::send_json(
            self.request(Method::GET, HISTORY_TABLE, identity).query(&[
                ("select", "*".to_string()),
                owner_filter(identity),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
            ]),
        )
        .await?;
        Ok(rows.into_iter().map(HistoryRow::into_entry).collect())
    }

    async fn insert_history(
        &self,
        identity: &Identity,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry> {
        let rows: Vec<HistoryRow> = Self::send_json(
            self.request(Method::POST, HISTORY_TABLE, identity)
                .header("Prefer", "return=representation")
                .json(&[InsertHistoryRow::new(identity, entry)]),
        )
        .await?;
        rows.into_iter()
            .next()
            .map(HistoryRow::into_entry)
            .ok_or_else(|| Error::Backend("insert returned no row".to_string()))
    }

    async fn delete_history(&self, identity: &Identity, id: &str) -> Result<()> {
        Self::send(
            self.request(Method::DELETE, HISTORY_TABLE, identity)
                .query(&[("id", format!("eq.{id}")), owner_filter(identity)]),
        )
        .await?;
        Ok(())
    }

    async fn clear_history(&self, identity: &Identity) -> Result<()> {
        Self::send(
            self.request(Method::DELETE, HISTORY_TABLE, identity)
                .query(&[owner_filter(identity)]),
        )
        .await?;
        Ok(())
    }

    async fn load_settings(&self, identity: &Identity) -> Result<Vec<SettingRow>> {
        Self::send_json(
            self.request(Method::GET, SETTINGS_TABLE, identity)
                .query(&[("select", "category,key,value".to_string()), owner_filter(identity)]),
        )
        .await
    }

    async fn upsert_setting(&self, identity: &Identity, row: &SettingRow) -> Result<()> {
        debug!(category = %row.category, key = %row.key, "upserting setting");
        Self::send(
            self.request(Method::POST, SETTINGS_TABLE, identity)
                .query(&[("on_conflict", "user_id,category,key")])
                .header("Prefer", "resolution=merge-duplicates")
                .json(&UpsertSettingRow {
                    user_id: &identity.user_id,
                    category: &row.category,
                    key: &row.key,
                    value: &row.value,
                    updated_at: Utc::now(),
                }),
        )
        .await?;
        Ok(())
    }

    async fn load_stats(&self, identity: &Identity) -> Result<UserStats> {
        let rows: Vec<UserStats> = Self::send_json(
            self.request(Method::GET, USERS_TABLE, identity).query(&[
                ("select", "total_analyses,total_prompts".to_string()),
                ("id", format!("eq.{}", identity.user_id)),
            ]),
        )
        .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    async fn store_stats(&self, identity: &Identity, stats: UserStats) -> Result<()> {
        Self::send(
            self.request(Method::PATCH, USERS_TABLE, identity)
                .query(&[("id", format!("eq.{}", identity.user_id))])
                .json(&StatsUpdate {
                    total_analyses: stats.total_analyses,
                    total_prompts: stats.total_prompts,
                    updated_at: Utc::now(),
                }),
        )
        .await?;
        Ok(())
    }

    async fn fetch_profile(&self, identity: &Identity) -> Result<Option<UserProfile>> {
        let rows: Vec<UserProfile> = Self::send_json(
            self.request(Method::GET, USERS_TABLE, identity).query(&[
                ("select", "*".to_string()),
                ("id", format!("eq.{}", identity.user_id)),
            ]),
        )
        .await?;
        Ok(rows.into_iter().next())
    }

    async fn create_profile(&self, identity: &Identity, fields: &ProfileUpdate) -> Result<()> {
        Self::send(
            self.request(Method::POST, USERS_TABLE, identity)
                .query(&[("on_conflict", "id")])
                .header("Prefer", "resolution=merge-duplicates")
                .json(&[ProfileRow {
                    id: &identity.user_id,
                    email: identity.email.as_deref(),
                    fields,
                    updated_at: Utc::now(),
                }]),
        )
        .await?;
        Ok(())
    }

    async fn update_profile(&self, identity: &Identity, update: &ProfileUpdate) -> Result<()> {
        Self::send(
            self.request(Method::PATCH, USERS_TABLE, identity)
                .query(&[("id", format!("eq.{}", identity.user_id))])
                .json(&ProfilePatch {
                    update,
                    updated_at: Utc::now(),
                }),
        )
        .await?;
        Ok(())
    }

    async fn log_api_usage(&self, identity: &Identity, usage: &ApiUsage) -> Result<()> {
        Self::send(
            self.request(Method::POST, USAGE_TABLE, identity)
                .json(&[UsageRow {
                    user_id: &identity.user_id,
                    usage,
                }]),
        )
        .await?;
        Ok(())
    }
}
