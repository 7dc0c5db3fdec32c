//! Storage trait definitions.

use crate::core::{
    ApiUsage, HistoryEntry, Identity, NewHistoryEntry, ProfileUpdate, SettingRow, UserProfile,
    UserStats,
};
use crate::error::Result;
use async_trait::async_trait;

/// Synchronous namespaced key-value storage.
///
/// Writes overwrite. There is no cross-process coordination: two writers of
/// the same namespace resolve by last write wins.
pub trait KeyValueStore: Send + Sync {
    /// Read a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn read(&self, namespace: &str) -> Result<Option<String>>;

    /// Write a namespace, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or would exceed the quota.
    fn write(&self, namespace: &str, value: &str) -> Result<()>;

    /// Delete a namespace. Deleting a missing namespace succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn delete(&self, namespace: &str) -> Result<()>;
}

/// Hosted relational backend with owner-scoped tables.
///
/// Every call is a single attempt; failures surface to the caller.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// History entries owned by `identity`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn load_history(&self, identity: &Identity, limit: usize) -> Result<Vec<HistoryEntry>>;

    /// Insert one entry; the backend assigns id and creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn insert_history(
        &self,
        identity: &Identity,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry>;

    /// Delete one entry, filtered by id and owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn delete_history(&self, identity: &Identity, id: &str) -> Result<()>;

    /// Delete every entry owned by `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn clear_history(&self, identity: &Identity) -> Result<()>;

    /// All settings rows owned by `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn load_settings(&self, identity: &Identity) -> Result<Vec<SettingRow>>;

    /// Insert or update a settings row keyed by (owner, category, key).
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn upsert_setting(&self, identity: &Identity, row: &SettingRow) -> Result<()>;

    /// Current aggregate counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn load_stats(&self, identity: &Identity) -> Result<UserStats>;

    /// Overwrite aggregate counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn store_stats(&self, identity: &Identity, stats: UserStats) -> Result<()>;

    /// Profile row, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn fetch_profile(&self, identity: &Identity) -> Result<Option<UserProfile>>;

    /// Create the identity's profile row with `fields` and the identity's
    /// email. An existing row gets those fields merged in.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn create_profile(&self, identity: &Identity, fields: &ProfileUpdate) -> Result<()>;

    /// Change fields of the identity's profile row. A missing row is left
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn update_profile(&self, identity: &Identity, update: &ProfileUpdate) -> Result<()>;

    /// Append to the API usage log.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn log_api_usage(&self, identity: &Identity, usage: &ApiUsage) -> Result<()>;
}
