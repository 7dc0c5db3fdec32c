//! Local persistence adapter.
//!
//! Typed access to history, settings, key mirrors, usage counters and the
//! persisted session, all on top of a [`KeyValueStore`].

use crate::core::{ApiProvider, HistoryEntry, Identity, NewHistoryEntry, SettingsRecord, UserStats};
use crate::error::Result;
use crate::storage::traits::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace holding the local history list.
pub const HISTORY_NAMESPACE: &str = "repromp-history";

/// Namespace holding the local settings record.
pub const SETTINGS_NAMESPACE: &str = "repromp-settings";

/// Namespace caching the signed-in user's settings record.
pub const SETTINGS_CACHE_NAMESPACE: &str = "repromp-remote-settings";

/// Namespace holding the persisted signed-in identity.
pub const SESSION_NAMESPACE: &str = "repromp-session";

const TOTAL_ANALYSES: &str = "total_analyses";
const TOTAL_PROMPTS: &str = "total_prompts";
const LAST_ANALYSIS: &str = "last_analysis";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedHistory {
    #[serde(default)]
    entries: Vec<HistoryEntry>,
}

/// Local persistence adapter.
///
/// Holds no state beyond the storage handle; clones share the handle.
#[derive(Clone)]
pub struct LocalAdapter {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAdapter").finish_non_exhaustive()
    }
}

impl LocalAdapter {
    /// Wrap a key-value store.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The underlying key-value store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    fn read_json<T: DeserializeOwned>(&self, namespace: &str) -> Result<Option<T>> {
        match self.store.read(namespace)? {
            Some(raw) if !raw.trim().is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, namespace: &str, value: &T) -> Result<()> {
        self.store.write(namespace, &serde_json::to_string(value)?)
    }

    /// Stored history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be read or holds corrupt JSON.
    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let persisted: PersistedHistory = self.read_json(HISTORY_NAMESPACE)?.unwrap_or_default();
        debug!(count = persisted.entries.len(), "loaded local history");
        Ok(persisted.entries)
    }

    /// Store a new entry at the head of the list.
    ///
    /// The id is the current time in milliseconds, bumped past any id
    /// already in the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be read or written.
    pub fn add_history_entry(&self, content: NewHistoryEntry) -> Result<HistoryEntry> {
        let mut persisted: PersistedHistory =
            self.read_json(HISTORY_NAMESPACE)?.unwrap_or_default();

        let now = Utc::now();
        let mut millis = now.timestamp_millis();
        while persisted
            .entries
            .iter()
            .any(|e| e.id == millis.to_string())
        {
            millis += 1;
        }

        let prompt_count = content.prompts.len();
        let entry = HistoryEntry::new(millis.to_string(), now, content);
        persisted.entries.insert(0, entry.clone());
        self.write_json(HISTORY_NAMESPACE, &persisted)?;

        if let Err(e) = self.record_analysis(prompt_count, now) {
            warn!(error = %e, "failed to update local usage counters");
        }

        Ok(entry)
    }

    /// Remove one entry. Removing a missing id succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be read or written.
    pub fn remove_history_entry(&self, id: &str) -> Result<()> {
        let mut persisted: PersistedHistory =
            self.read_json(HISTORY_NAMESPACE)?.unwrap_or_default();
        persisted.entries.retain(|e| e.id != id);
        self.write_json(HISTORY_NAMESPACE, &persisted)
    }

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be deleted.
    pub fn clear_history(&self) -> Result<()> {
        self.store.delete(HISTORY_NAMESPACE)
    }

    /// Stored settings, with the standalone key mirrors taking precedence
    /// over keys inside the record.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or holds corrupt JSON.
    pub fn load_settings(&self) -> Result<SettingsRecord> {
        self.load_settings_from(SETTINGS_NAMESPACE)
    }

    /// Persist the full settings record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_settings(&self, record: &SettingsRecord) -> Result<()> {
        self.write_json(SETTINGS_NAMESPACE, record)
    }

    /// Offline copy of the signed-in user's settings, key mirrors taking
    /// precedence as in [`load_settings`](Self::load_settings).
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or holds corrupt JSON.
    pub fn load_cached_settings(&self) -> Result<SettingsRecord> {
        self.load_settings_from(SETTINGS_CACHE_NAMESPACE)
    }

    /// Refresh the offline copy of the signed-in user's settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_cached_settings(&self, record: &SettingsRecord) -> Result<()> {
        self.write_json(SETTINGS_CACHE_NAMESPACE, record)
    }

    fn load_settings_from(&self, namespace: &str) -> Result<SettingsRecord> {
        let mut record: SettingsRecord = self.read_json(namespace)?.unwrap_or_default();
        record.visionati_key = self
            .mirrored_key(ApiProvider::Visionati)?
            .unwrap_or_default();
        record.straico_key = self.mirrored_key(ApiProvider::Straico)?.unwrap_or_default();
        Ok(record)
    }

    /// Synchronous read of a provider key from its standalone mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn mirrored_key(&self, provider: ApiProvider) -> Result<Option<String>> {
        Ok(self
            .store
            .read(provider.mirror_namespace())?
            .filter(|k| !k.is_empty()))
    }

    /// Write a provider key mirror; an empty key removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn write_mirror(&self, provider: ApiProvider, key: &str) -> Result<()> {
        if key.is_empty() {
            self.store.delete(provider.mirror_namespace())
        } else {
            self.store.write(provider.mirror_namespace(), key)
        }
    }

    fn read_counter(&self, namespace: &str) -> Result<u64> {
        Ok(self
            .store
            .read(namespace)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    /// Local usage counters.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn load_stats(&self) -> Result<UserStats> {
        Ok(UserStats {
            total_analyses: self.read_counter(TOTAL_ANALYSES)?,
            total_prompts: self.read_counter(TOTAL_PROMPTS)?,
        })
    }

    /// Time of the last locally stored analysis.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn last_analysis(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .read(LAST_ANALYSIS)?
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|t| t.with_timezone(&Utc)))
    }

    fn record_analysis(&self, prompts: usize, at: DateTime<Utc>) -> Result<()> {
        let stats = self.load_stats()?;
        self.store
            .write(TOTAL_ANALYSES, &(stats.total_analyses + 1).to_string())?;
        self.store.write(
            TOTAL_PROMPTS,
            &(stats.total_prompts + prompts as u64).to_string(),
        )?;
        self.store.write(LAST_ANALYSIS, &at.to_rfc3339())
    }

    /// Persisted identity from a previous sign-in.
    ///
    /// A corrupt record is treated as signed out.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn load_identity(&self) -> Result<Option<Identity>> {
        match self.read_json(SESSION_NAMESPACE) {
            Ok(identity) => Ok(identity),
            Err(crate::Error::Serde(e)) => {
                warn!(error = %e, "discarding corrupt persisted session");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the signed-in identity, or clear it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn save_identity(&self, identity: Option<&Identity>) -> Result<()> {
        match identity {
            Some(identity) => self.write_json(SESSION_NAMESPACE, identity),
            None => self.store.delete(SESSION_NAMESPACE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;

    fn adapter() -> LocalAdapter {
        LocalAdapter::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn empty_history() {
        assert!(adapter().load_history().unwrap().is_empty());
    }

    #[test]
    fn add_prepends_and_persists() {
        let local = adapter();
        let first = local
            .add_history_entry(NewHistoryEntry::new("a.png", "a"))
            .unwrap();
        let second = local
            .add_history_entry(NewHistoryEntry::new("b.png", "b"))
            .unwrap();

        assert_ne!(first.id, second.id);
        let entries = local.load_history().unwrap();
        assert_eq!(entries[0].id, second.id);
        assert_eq!(entries[1].id, first.id);
    }

    #[test]
    fn ids_are_timestamp_strings() {
        let local = adapter();
        let entry = local
            .add_history_entry(NewHistoryEntry::new("a.png", "a"))
            .unwrap();
        let millis: i64 = entry.id.parse().unwrap();
        assert!((millis - entry.created_at.timestamp_millis()).abs() < 1000);
    }

    #[test]
    fn remove_and_clear() {
        let local = adapter();
        let a = local
            .add_history_entry(NewHistoryEntry::new("a.png", "a"))
            .unwrap();
        local
            .add_history_entry(NewHistoryEntry::new("b.png", "b"))
            .unwrap();

        local.remove_history_entry(&a.id).unwrap();
        assert_eq!(local.load_history().unwrap().len(), 1);

        local.clear_history().unwrap();
        assert!(local.load_history().unwrap().is_empty());
    }

    #[test]
    fn corrupt_history_is_an_error() {
        let local = adapter();
        local.store().write(HISTORY_NAMESPACE, "{ nope").unwrap();
        assert!(local.load_history().is_err());
    }

    #[test]
    fn mirrors_override_record_keys() {
        let local = adapter();
        let record = SettingsRecord {
            visionati_key: "stale".to_string(),
            ..SettingsRecord::default()
        };
        local.save_settings(&record).unwrap();
        local.write_mirror(ApiProvider::Visionati, "fresh").unwrap();

        let loaded = local.load_settings().unwrap();
        assert_eq!(loaded.visionati_key, "fresh");
    }

    #[test]
    fn cached_settings_are_separate_from_local_record() {
        let local = adapter();
        let mut cached = SettingsRecord::default();
        cached.default_template_params.mood = "Dramatic".to_string();
        local.save_cached_settings(&cached).unwrap();

        assert_eq!(
            local.load_cached_settings().unwrap().default_template_params.mood,
            "Dramatic"
        );
        assert_eq!(
            local.load_settings().unwrap().default_template_params.mood,
            "Neutral"
        );
    }

    #[test]
    fn empty_mirror_write_removes_key() {
        let local = adapter();
        local.write_mirror(ApiProvider::Straico, "s-key").unwrap();
        assert_eq!(
            local.mirrored_key(ApiProvider::Straico).unwrap().as_deref(),
            Some("s-key")
        );

        local.write_mirror(ApiProvider::Straico, "").unwrap();
        assert!(local.mirrored_key(ApiProvider::Straico).unwrap().is_none());
        assert!(local.store().read("straico_api_key").unwrap().is_none());
    }

    #[test]
    fn add_bumps_usage_counters() {
        let local = adapter();
        let entry = NewHistoryEntry::new("a.png", "a").with_prompts(vec![
            crate::core::GeneratedContent::prompt("one", "photographic"),
            crate::core::GeneratedContent::prompt("two", "artistic"),
        ]);
        local.add_history_entry(entry).unwrap();

        let stats = local.load_stats().unwrap();
        assert_eq!(stats.total_analyses, 1);
        assert_eq!(stats.total_prompts, 2);
        assert!(local.last_analysis().unwrap().is_some());
    }

    #[test]
    fn identity_round_trip_and_clear() {
        let local = adapter();
        let identity = Identity::new("u-1").with_email("a@example.com");
        local.save_identity(Some(&identity)).unwrap();
        assert_eq!(local.load_identity().unwrap(), Some(identity));

        local.save_identity(None).unwrap();
        assert!(local.load_identity().unwrap().is_none());
    }

    #[test]
    fn corrupt_session_reads_as_signed_out() {
        let local = adapter();
        local.store().write(SESSION_NAMESPACE, "garbage").unwrap();
        assert!(local.load_identity().unwrap().is_none());
    }
}
