//! In-memory storage backends for testing.

use crate::core::{
    ApiUsage, HistoryEntry, Identity, NewHistoryEntry, ProfileUpdate, SettingRow, UserProfile,
    UserStats,
};
use crate::error::{Error, Result};
use crate::storage::traits::{KeyValueStore, RemoteBackend};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory key-value store for testing.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: RwLock<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryKeyValueStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, namespace: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(namespace).cloned())
    }

    fn write(&self, namespace: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(namespace.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, namespace: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(namespace);
        Ok(())
    }
}

/// Remote operations counted by [`MemoryRemote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    LoadHistory,
    InsertHistory,
    DeleteHistory,
    ClearHistory,
    LoadSettings,
    UpsertSetting,
    LoadStats,
    StoreStats,
    FetchProfile,
    CreateProfile,
    UpdateProfile,
    LogApiUsage,
}

#[derive(Debug, Default)]
struct Tables {
    /// (owner, entry), oldest first.
    history: Vec<(String, HistoryEntry)>,
    /// (owner, category, key) -> value.
    settings: HashMap<(String, String, String), Value>,
    stats: HashMap<String, UserStats>,
    profiles: HashMap<String, UserProfile>,
    usage: Vec<(String, ApiUsage)>,
}

/// In-memory hosted backend for testing.
///
/// Every operation yields at least once, so concurrent callers interleave
/// the way network calls do. Operations can be held at a gate with
/// [`pause`](Self::pause) and failed with [`fail_with`](Self::fail_with).
#[derive(Debug)]
pub struct MemoryRemote {
    tables: Mutex<Tables>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
    gate: watch::Sender<bool>,
    failures: Mutex<HashMap<RemoteOp, String>>,
    fail_all: Mutex<Option<String>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self {
            tables: Mutex::default(),
            calls: Mutex::default(),
            gate: watch::Sender::new(true),
            failures: Mutex::default(),
            fail_all: Mutex::default(),
        }
    }
}

impl MemoryRemote {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every operation that starts from now on until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Release held operations.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Fail every operation with a backend error (`None` clears).
    pub fn fail_with(&self, message: Option<&str>) {
        *lock(&self.fail_all) = message.map(str::to_string);
    }

    /// Fail one kind of operation with a backend error.
    pub fn fail_op(&self, op: RemoteOp, message: &str) {
        lock(&self.failures).insert(op, message.to_string());
    }

    /// Number of times an operation was issued (including held and failed ones).
    #[must_use]
    pub fn calls(&self, op: RemoteOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Seed an entry directly, bypassing counters and gates.
    pub fn seed_entry(&self, owner: &str, entry: NewHistoryEntry) -> HistoryEntry {
        let stored = HistoryEntry::new(Uuid::new_v4().to_string(), Utc::now(), entry);
        lock(&self.tables)
            .history
            .push((owner.to_string(), stored.clone()));
        stored
    }

    /// Seed a profile row.
    pub fn seed_profile(&self, profile: UserProfile) {
        let mut tables = lock(&self.tables);
        tables.stats.insert(profile.id.clone(), profile.stats);
        tables.profiles.insert(profile.id.clone(), profile);
    }

    /// Stored counters for an owner.
    #[must_use]
    pub fn stats_of(&self, owner: &str) -> UserStats {
        lock(&self.tables)
            .stats
            .get(owner)
            .copied()
            .unwrap_or_default()
    }

    /// Stored settings value.
    #[must_use]
    pub fn setting_of(&self, owner: &str, category: &str, key: &str) -> Option<Value> {
        lock(&self.tables)
            .settings
            .get(&(owner.to_string(), category.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of entries stored for an owner.
    #[must_use]
    pub fn entry_count(&self, owner: &str) -> usize {
        lock(&self.tables)
            .history
            .iter()
            .filter(|(o, _)| o == owner)
            .count()
    }

    /// Usage log rows for an owner.
    #[must_use]
    pub fn usage_of(&self, owner: &str) -> Vec<ApiUsage> {
        lock(&self.tables)
            .usage
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Count the call, wait at the gate, then apply injected failures.
    async fn enter(&self, op: RemoteOp) -> Result<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;

        let mut open = self.gate.subscribe();
        if open.wait_for(|open| *open).await.is_err() {
            return Err(Error::Backend("gate closed".to_string()));
        }
        tokio::task::yield_now().await;

        if let Some(message) = lock(&self.fail_all).clone() {
            return Err(Error::Backend(message));
        }
        if let Some(message) = lock(&self.failures).get(&op).cloned() {
            return Err(Error::Backend(message));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MemoryRemote {
    async fn load_history(&self, identity: &Identity, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.enter(RemoteOp::LoadHistory).await?;
        let tables = lock(&self.tables);
        Ok(tables
            .history
            .iter()
            .rev()
            .filter(|(owner, _)| *owner == identity.user_id)
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn insert_history(
        &self,
        identity: &Identity,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry> {
        self.enter(RemoteOp::InsertHistory).await?;
        let stored = HistoryEntry::new(Uuid::new_v4().to_string(), Utc::now(), entry.clone());
        lock(&self.tables)
            .history
            .push((identity.user_id.clone(), stored.clone()));
        Ok(stored)
    }

    async fn delete_history(&self, identity: &Identity, id: &str) -> Result<()> {
        self.enter(RemoteOp::DeleteHistory).await?;
        lock(&self.tables)
            .history
            .retain(|(owner, entry)| !(*owner == identity.user_id && entry.id == id));
        Ok(())
    }

    async fn clear_history(&self, identity: &Identity) -> Result<()> {
        self.enter(RemoteOp::ClearHistory).await?;
        lock(&self.tables)
            .history
            .retain(|(owner, _)| *owner != identity.user_id);
        Ok(())
    }

    async fn load_settings(&self, identity: &Identity) -> Result<Vec<SettingRow>> {
        self.enter(RemoteOp::LoadSettings).await?;
        let tables = lock(&self.tables);
        Ok(tables
            .settings
            .iter()
            .filter(|((owner, _, _), _)| *owner == identity.user_id)
            .map(|((_, category, key), value)| SettingRow {
                category: category.clone(),
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn upsert_setting(&self, identity: &Identity, row: &SettingRow) -> Result<()> {
        self.enter(RemoteOp::UpsertSetting).await?;
        lock(&self.tables).settings.insert(
            (identity.user_id.clone(), row.category.clone(), row.key.clone()),
            row.value.clone(),
        );
        Ok(())
    }

    async fn load_stats(&self, identity: &Identity) -> Result<UserStats> {
        self.enter(RemoteOp::LoadStats).await?;
        Ok(self.stats_of(&identity.user_id))
    }

    async fn store_stats(&self, identity: &Identity, stats: UserStats) -> Result<()> {
        self.enter(RemoteOp::StoreStats).await?;
        let mut tables = lock(&self.tables);
        tables.stats.insert(identity.user_id.clone(), stats);
        if let Some(profile) = tables.profiles.get_mut(&identity.user_id) {
            profile.stats = stats;
        }
        Ok(())
    }

    async fn fetch_profile(&self, identity: &Identity) -> Result<Option<UserProfile>> {
        self.enter(RemoteOp::FetchProfile).await?;
        Ok(lock(&self.tables).profiles.get(&identity.user_id).cloned())
    }

    async fn create_profile(&self, identity: &Identity, fields: &ProfileUpdate) -> Result<()> {
        self.enter(RemoteOp::CreateProfile).await?;
        let mut tables = lock(&self.tables);
        let stats = tables
            .stats
            .get(&identity.user_id)
            .copied()
            .unwrap_or_default();
        let profile = tables
            .profiles
            .entry(identity.user_id.clone())
            .or_insert_with(|| UserProfile {
                id: identity.user_id.clone(),
                created_at: Some(Utc::now()),
                stats,
                ..UserProfile::default()
            });
        if identity.email.is_some() {
            profile.email.clone_from(&identity.email);
        }
        fields.apply_to(profile);
        Ok(())
    }

    async fn update_profile(&self, identity: &Identity, update: &ProfileUpdate) -> Result<()> {
        self.enter(RemoteOp::UpdateProfile).await?;
        if let Some(profile) = lock(&self.tables).profiles.get_mut(&identity.user_id) {
            update.apply_to(profile);
        }
        Ok(())
    }

    async fn log_api_usage(&self, identity: &Identity, usage: &ApiUsage) -> Result<()> {
        self.enter(RemoteOp::LogApiUsage).await?;
        lock(&self.tables)
            .usage
            .push((identity.user_id.clone(), usage.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn kv_read_missing() {
        let store = MemoryKeyValueStore::new();
        assert!(store.read("nonexistent").unwrap().is_none());
    }

    #[test]
    fn kv_write_read_delete() {
        let store = MemoryKeyValueStore::new();
        store.write("ns", "value").unwrap();
        assert_eq!(store.read("ns").unwrap().as_deref(), Some("value"));
        assert_eq!(store.write_count(), 1);

        store.delete("ns").unwrap();
        assert!(store.read("ns").unwrap().is_none());
        store.delete("ns").unwrap();
    }

    #[test]
    fn kv_concurrent_writes() {
        use std::thread;

        let store = Arc::new(MemoryKeyValueStore::new());
        let mut handles = vec![];
        for i in 0..10 {
            let store_clone = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..10 {
                    store_clone.write(&format!("ns-{i}-{j}"), "v").unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Thread panicked");
        }
        assert_eq!(store.write_count(), 100);
    }

    #[tokio::test]
    async fn history_is_owner_scoped_and_newest_first() {
        let remote = MemoryRemote::new();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");

        remote
            .insert_history(&alice, &NewHistoryEntry::new("a1.png", "first"))
            .await
            .unwrap();
        remote
            .insert_history(&bob, &NewHistoryEntry::new("b1.png", "other"))
            .await
            .unwrap();
        remote
            .insert_history(&alice, &NewHistoryEntry::new("a2.png", "second"))
            .await
            .unwrap();

        let entries = remote.load_history(&alice, 50).await.unwrap();
        let names: Vec<_> = entries.iter().map(HistoryEntry::image_name).collect();
        assert_eq!(names, ["a2.png", "a1.png"]);

        let limited = remote.load_history(&alice, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn create_profile_keeps_counters_and_update_needs_a_row() {
        let remote = MemoryRemote::new();
        let ada = Identity::new("ada").with_email("ada@example.com");

        remote
            .update_profile(&ada, &ProfileUpdate::display_name("Ghost"))
            .await
            .unwrap();
        assert!(remote.fetch_profile(&ada).await.unwrap().is_none());

        remote
            .store_stats(
                &ada,
                UserStats {
                    total_analyses: 2,
                    total_prompts: 6,
                },
            )
            .await
            .unwrap();
        remote
            .create_profile(&ada, &ProfileUpdate::display_name("Ada"))
            .await
            .unwrap();
        remote
            .update_profile(
                &ada,
                &ProfileUpdate {
                    avatar_url: Some("https://example.com/ada.png".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        let profile = remote.fetch_profile(&ada).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        assert_eq!(profile.avatar_url.as_deref(), Some("https://example.com/ada.png"));
        assert_eq!(profile.stats.total_analyses, 2);
    }

    #[tokio::test]
    async fn delete_requires_owner_match() {
        let remote = MemoryRemote::new();
        let entry = remote.seed_entry("alice", NewHistoryEntry::new("a.png", "a"));

        remote
            .delete_history(&Identity::new("mallory"), &entry.id)
            .await
            .unwrap();
        assert_eq!(remote.entry_count("alice"), 1);

        remote
            .delete_history(&Identity::new("alice"), &entry.id)
            .await
            .unwrap();
        assert_eq!(remote.entry_count("alice"), 0);
    }

    #[tokio::test]
    async fn upsert_replaces_by_category_and_key() {
        let remote = MemoryRemote::new();
        let alice = Identity::new("alice");
        let row = |value: &str| SettingRow {
            category: "api".to_string(),
            key: "visionati_key".to_string(),
            value: Value::String(value.to_string()),
        };

        remote.upsert_setting(&alice, &row("one")).await.unwrap();
        remote.upsert_setting(&alice, &row("two")).await.unwrap();

        let rows = remote.load_settings(&alice).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Value::String("two".to_string()));
    }

    #[tokio::test]
    async fn injected_failure_is_counted_and_returned() {
        let remote = MemoryRemote::new();
        remote.fail_op(RemoteOp::LoadHistory, "connection reset");

        let err = remote
            .load_history(&Identity::new("alice"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(ref m) if m == "connection reset"));
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 1);

        // Other operations unaffected
        remote.clear_history(&Identity::new("alice")).await.unwrap();
    }

    #[tokio::test]
    async fn paused_operations_wait_for_resume() {
        let remote = Arc::new(MemoryRemote::new());
        remote.pause();

        let task = {
            let remote = Arc::clone(&remote);
            tokio::spawn(async move { remote.clear_history(&Identity::new("alice")).await })
        };

        while remote.calls(RemoteOp::ClearHistory) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!task.is_finished());

        remote.resume();
        task.await.unwrap().unwrap();
    }
}
