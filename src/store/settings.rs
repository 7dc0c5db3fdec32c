//! Settings store: API keys and default generation parameters.
//!
//! Every setter writes the in-memory record and the local key mirrors
//! before the backend write is awaited, so a synchronous reader sees the new
//! key as soon as the setter is called.

use crate::core::{ApiProvider, SettingField, SettingsRecord, TemplateParams};
use crate::error::{Error, Result};
use crate::storage::LocalAdapter;
use crate::store::selector::Backend;
use crate::store::status::{StoreCell, StoreStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Version written into exported settings files.
pub const EXPORT_VERSION: &str = "1.0";

/// Portable settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsExport {
    #[serde(default)]
    pub visionati_key: Option<String>,
    #[serde(default)]
    pub straico_key: Option<String>,
    #[serde(default)]
    pub export_date: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl SettingsExport {
    fn key(&self, provider: ApiProvider) -> Option<&str> {
        match provider {
            ApiProvider::Visionati => self.visionati_key.as_deref(),
            ApiProvider::Straico => self.straico_key.as_deref(),
        }
        .filter(|k| !k.is_empty())
    }
}

/// Settings store.
#[derive(Debug)]
pub struct SettingsStore {
    backend: Backend,
    mirror: LocalAdapter,
    cell: StoreCell<SettingsRecord>,
}

impl SettingsStore {
    /// Uninitialized store over `backend`, mirroring keys into `mirror`.
    #[must_use]
    pub fn new(backend: Backend, mirror: LocalAdapter) -> Self {
        Self {
            backend,
            mirror,
            cell: StoreCell::new(SettingsRecord::default()),
        }
    }

    /// The backend this store persists through.
    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Current status flags.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.cell.status()
    }

    /// Snapshot of the in-memory record.
    #[must_use]
    pub fn settings(&self) -> SettingsRecord {
        self.cell.snapshot()
    }

    /// In-memory key for a provider; empty when unset.
    #[must_use]
    pub fn api_key(&self, provider: ApiProvider) -> String {
        self.cell.read(|record| record.key(provider).to_string())
    }

    /// Replace the record with what the backend holds.
    ///
    /// A remote load folds stored rows over the in-memory record and then
    /// copies non-empty keys into the local mirrors. Does nothing if a load
    /// is in flight or the store is already initialized. A load that
    /// outlives an identity change touches neither the record nor the
    /// mirrors.
    ///
    /// # Errors
    ///
    /// Backend errors; the record is left unchanged and the error recorded.
    pub async fn load_settings(&self) -> Result<()> {
        let Some(ticket) = self.cell.begin_load() else {
            debug!(backend = %self.backend.kind(), "settings already loading or loaded");
            return Ok(());
        };

        let result = match &self.backend {
            Backend::Local(local) => local.load_settings(),
            Backend::Remote(remote) => remote.load_settings(self.cell.snapshot()).await,
        };
        let Some(record) = self
            .cell
            .finish_current(ticket, result, |current, loaded| current.clone_from(loaded))?
        else {
            debug!("identity changed during settings load, not mirroring");
            return Ok(());
        };

        if self.backend.is_remote() {
            for provider in ApiProvider::ALL {
                if let Some(key) = record.key_if_set(provider) {
                    if let Err(e) = self.mirror.write_mirror(provider, key) {
                        warn!(provider = %provider.label(), error = %e, "failed to mirror API key");
                    }
                }
            }
            if let Err(e) = self.mirror.save_cached_settings(&record) {
                warn!(error = %e, "failed to cache settings locally");
            }
        }
        Ok(())
    }

    /// Populate the record from local storage alone, without the backend.
    ///
    /// Returns false if the store was already initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read.
    pub fn initialize_from_storage(&self) -> Result<bool> {
        if self.cell.status().is_initialized {
            return Ok(false);
        }
        let stored = match &self.backend {
            Backend::Local(local) => local.load_settings()?,
            Backend::Remote(_) => self.mirror.load_cached_settings()?,
        };
        Ok(self.cell.initialize_with(|record| *record = stored))
    }

    /// Set the image-analysis provider key.
    ///
    /// # Errors
    ///
    /// See [`set_field`](Self::set_field).
    pub async fn set_visionati_key(&self, key: impl Into<String>) -> Result<()> {
        self.set_field(SettingField::ApiKey(ApiProvider::Visionati, key.into()))
            .await
    }

    /// Set the prompt-generation provider key.
    ///
    /// # Errors
    ///
    /// See [`set_field`](Self::set_field).
    pub async fn set_straico_key(&self, key: impl Into<String>) -> Result<()> {
        self.set_field(SettingField::ApiKey(ApiProvider::Straico, key.into()))
            .await
    }

    /// Replace the default generation parameters.
    ///
    /// # Errors
    ///
    /// See [`set_field`](Self::set_field).
    pub async fn set_default_template_params(&self, params: TemplateParams) -> Result<()> {
        self.set_field(SettingField::TemplateParams(params)).await
    }

    /// Write every field of `record`.
    ///
    /// All fields are attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// See [`set_field`](Self::set_field).
    pub async fn update_settings(&self, record: SettingsRecord) -> Result<()> {
        let fields = [
            SettingField::ApiKey(ApiProvider::Visionati, record.visionati_key),
            SettingField::ApiKey(ApiProvider::Straico, record.straico_key),
            SettingField::TemplateParams(record.default_template_params),
        ];
        let mut first_error = None;
        for field in fields {
            if let Err(e) = self.set_field(field).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Apply one field change.
    ///
    /// The in-memory record and, for keys, the local mirror are written
    /// before the backend. A failure of either write does not stop the
    /// other and nothing is rolled back.
    ///
    /// # Errors
    ///
    /// The backend error if the backend write failed, otherwise the mirror
    /// error. Either is also recorded in the status.
    pub async fn set_field(&self, field: SettingField) -> Result<()> {
        self.cell.update(|record| record.apply(&field));
        let snapshot = self.cell.snapshot();

        let mut mirror_error = None;
        if let SettingField::ApiKey(provider, key) = &field {
            if let Err(e) = self.mirror.write_mirror(*provider, key) {
                warn!(provider = %provider.label(), error = %e, "failed to mirror API key");
                mirror_error = Some(e);
            }
        }

        let ticket = self.cell.begin_write();
        let result = match &self.backend {
            Backend::Local(local) => local.save_settings(&snapshot),
            Backend::Remote(remote) => {
                if let Err(e) = self.mirror.save_cached_settings(&snapshot) {
                    warn!(error = %e, "failed to cache settings locally");
                }
                remote.set_setting(&field).await
            }
        };
        self.cell.finish(ticket, result, |_, ()| {})?;

        match mirror_error {
            Some(e) => {
                self.cell.record_error(e.to_string());
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Serialize the keys as a portable settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_settings(&self) -> Result<String> {
        let record = self.cell.snapshot();
        let export = SettingsExport {
            visionati_key: Some(record.visionati_key),
            straico_key: Some(record.straico_key),
            export_date: Some(Utc::now().to_rfc3339()),
            version: Some(EXPORT_VERSION.to_string()),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Apply keys from a settings file. Empty or missing keys are skipped.
    ///
    /// # Errors
    ///
    /// `InvalidImport` if the document is not a settings file or carries
    /// no key; otherwise setter errors.
    pub async fn import_settings(&self, json: &str) -> Result<()> {
        let import: SettingsExport =
            serde_json::from_str(json).map_err(|e| Error::InvalidImport(e.to_string()))?;

        let keys: Vec<(ApiProvider, String)> = ApiProvider::ALL
            .into_iter()
            .filter_map(|p| import.key(p).map(|k| (p, k.to_string())))
            .collect();
        if keys.is_empty() {
            return Err(Error::InvalidImport("no API keys found".to_string()));
        }

        let mut first_error = None;
        for (provider, key) in keys {
            if let Err(e) = self.set_field(SettingField::ApiKey(provider, key)).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Clear the initialized latch so the next load reads the backend.
    pub fn reset_initialization(&self) {
        self.cell.reset_initialization();
    }

    /// Drop the in-memory record and reset initialization.
    pub fn discard(&self) {
        self.cell.reset(SettingsRecord::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Identity;
    use crate::session::SessionProvider;
    use crate::storage::memory::{MemoryRemote, RemoteOp};
    use crate::storage::{MemoryKeyValueStore, RemoteAdapter};
    use serde_json::Value;
    use std::sync::Arc;

    fn local_adapter() -> LocalAdapter {
        LocalAdapter::new(Arc::new(MemoryKeyValueStore::new()))
    }

    fn remote_store() -> (Arc<SettingsStore>, Arc<MemoryRemote>, LocalAdapter) {
        let session = SessionProvider::new();
        session.sign_in(Identity::new("u-1")).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let local = local_adapter();
        let adapter = RemoteAdapter::new(session, remote.clone());
        let store = SettingsStore::new(Backend::Remote(adapter), local.clone());
        (Arc::new(store), remote, local)
    }

    #[tokio::test]
    async fn local_setter_persists_record_and_mirror() {
        let local = local_adapter();
        let store = SettingsStore::new(Backend::Local(local.clone()), local.clone());

        store.set_visionati_key("v-key").await.unwrap();
        assert_eq!(store.api_key(ApiProvider::Visionati), "v-key");
        assert_eq!(
            local.mirrored_key(ApiProvider::Visionati).unwrap().as_deref(),
            Some("v-key")
        );

        let reopened = SettingsStore::new(Backend::Local(local.clone()), local);
        reopened.load_settings().await.unwrap();
        assert_eq!(reopened.settings().visionati_key, "v-key");
    }

    #[tokio::test]
    async fn mirror_is_written_before_remote_resolves() {
        let (store, remote, local) = remote_store();
        remote.pause();

        let pending = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.set_straico_key("K").await })
        };
        while remote.calls(RemoteOp::UpsertSetting) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            local.mirrored_key(ApiProvider::Straico).unwrap().as_deref(),
            Some("K")
        );
        assert_eq!(store.api_key(ApiProvider::Straico), "K");
        assert!(store.status().loading);

        remote.resume();
        pending.await.unwrap().unwrap();
        assert_eq!(
            remote.setting_of("u-1", "api", "straico_key"),
            Some(Value::String("K".to_string()))
        );
    }

    #[tokio::test]
    async fn remote_failure_keeps_mirror_and_records_error() {
        let (store, remote, local) = remote_store();
        remote.fail_op(RemoteOp::UpsertSetting, "row level security");

        assert!(store.set_visionati_key("v-key").await.is_err());
        assert_eq!(
            local.mirrored_key(ApiProvider::Visionati).unwrap().as_deref(),
            Some("v-key")
        );
        assert_eq!(store.api_key(ApiProvider::Visionati), "v-key");
        assert!(store
            .status()
            .error
            .unwrap()
            .contains("row level security"));
    }

    #[tokio::test]
    async fn remote_load_mirrors_non_empty_keys() {
        let (store, _remote, local) = remote_store();
        store.set_visionati_key("v-key").await.unwrap();
        local.write_mirror(ApiProvider::Visionati, "").unwrap();

        store.reset_initialization();
        store.load_settings().await.unwrap();

        assert_eq!(
            local.mirrored_key(ApiProvider::Visionati).unwrap().as_deref(),
            Some("v-key")
        );
        assert!(local.mirrored_key(ApiProvider::Straico).unwrap().is_none());
    }

    #[tokio::test]
    async fn template_params_round_trip_through_remote() {
        let (store, _remote, _local) = remote_store();
        let params = TemplateParams {
            mood: "Dramatic".to_string(),
            ..TemplateParams::default()
        };
        store.set_default_template_params(params).await.unwrap();

        store.discard();
        store.load_settings().await.unwrap();
        let loaded = store.settings().default_template_params;
        assert_eq!(loaded.mood, "Dramatic");
        assert_eq!(loaded.style, "Photorealistic");
    }

    #[tokio::test]
    async fn initialize_from_storage_reads_mirrors_once() {
        let (store, remote, local) = remote_store();
        local.write_mirror(ApiProvider::Straico, "cached").unwrap();

        assert!(store.initialize_from_storage().unwrap());
        assert_eq!(store.api_key(ApiProvider::Straico), "cached");
        assert!(store.status().is_initialized);
        assert!(!store.initialize_from_storage().unwrap());
        assert_eq!(remote.calls(RemoteOp::LoadSettings), 0);
    }

    #[tokio::test]
    async fn export_then_import_into_fresh_store() {
        let local = local_adapter();
        let store = SettingsStore::new(Backend::Local(local.clone()), local);
        store.set_visionati_key("v-key").await.unwrap();
        store.set_straico_key("s-key").await.unwrap();

        let exported = store.export_settings().unwrap();
        let parsed: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed["version"], "1.0");
        assert!(parsed["exportDate"].is_string());

        let other = local_adapter();
        let fresh = SettingsStore::new(Backend::Local(other.clone()), other);
        fresh.import_settings(&exported).await.unwrap();
        assert_eq!(fresh.api_key(ApiProvider::Visionati), "v-key");
        assert_eq!(fresh.api_key(ApiProvider::Straico), "s-key");
    }

    #[tokio::test]
    async fn import_rejects_documents_without_keys() {
        let local = local_adapter();
        let store = SettingsStore::new(Backend::Local(local.clone()), local);

        let err = store
            .import_settings(r#"{"version":"1.0","visionatiKey":""}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImport(_)));

        let err = store.import_settings("not json").await.unwrap_err();
        assert!(matches!(err, Error::InvalidImport(_)));
    }

    #[tokio::test]
    async fn import_skips_missing_key() {
        let local = local_adapter();
        let store = SettingsStore::new(Backend::Local(local.clone()), local);
        store.set_visionati_key("keep-me").await.unwrap();

        store
            .import_settings(r#"{"straicoKey":"s-key"}"#)
            .await
            .unwrap();
        assert_eq!(store.api_key(ApiProvider::Visionati), "keep-me");
        assert_eq!(store.api_key(ApiProvider::Straico), "s-key");
    }
}
