//! Remote persistence adapter.
//!
//! Resolves the current identity from the session provider and forwards to a
//! [`RemoteBackend`]. Every operation fails with `NotAuthenticated` when no
//! identity is present.

use crate::core::{
    ApiUsage, HistoryEntry, Identity, NewHistoryEntry, ProfileUpdate, SettingField,
    SettingsRecord, UserProfile, UserStats,
};
use crate::error::{Error, Result};
use crate::session::SessionProvider;
use crate::storage::traits::RemoteBackend;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of history entries loaded from the backend.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Remote persistence adapter.
#[derive(Clone)]
pub struct RemoteAdapter {
    session: SessionProvider,
    backend: Arc<dyn RemoteBackend>,
    history_limit: usize,
}

impl std::fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("session", &self.session)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

impl RemoteAdapter {
    /// Wrap a backend.
    #[must_use]
    pub fn new(session: SessionProvider, backend: Arc<dyn RemoteBackend>) -> Self {
        Self {
            session,
            backend,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Set how many entries `load_history` fetches.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// The session this adapter reads identity from.
    #[must_use]
    pub fn session(&self) -> &SessionProvider {
        &self.session
    }

    fn identity(&self) -> Result<Identity> {
        self.session
            .current_identity()
            .ok_or(Error::NotAuthenticated)
    }

    /// History for the current identity, newest first.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let identity = self.identity()?;
        let entries = self
            .backend
            .load_history(&identity, self.history_limit)
            .await?;
        debug!(user_id = %identity.user_id, count = entries.len(), "loaded remote history");
        Ok(entries)
    }

    /// Insert an entry, then bump the user's aggregate counters.
    ///
    /// The counter update is best effort: its failure is logged and does not
    /// undo the insert.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise insert errors.
    pub async fn add_history_entry(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry> {
        let identity = self.identity()?;
        let stored = self.backend.insert_history(&identity, entry).await?;

        if let Err(e) = self.increment_stats(&identity, entry.prompts.len()).await {
            warn!(user_id = %identity.user_id, error = %e, "failed to update user stats");
        }

        Ok(stored)
    }

    /// Read-modify-write of the counters. Concurrent writers can lose
    /// updates.
    async fn increment_stats(&self, identity: &Identity, prompts: usize) -> Result<()> {
        let current = self.backend.load_stats(identity).await?;
        let next = UserStats {
            total_analyses: current.total_analyses + 1,
            total_prompts: current.total_prompts + prompts as u64,
        };
        self.backend.store_stats(identity, next).await
    }

    /// Delete one entry owned by the current identity.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn remove_history_entry(&self, id: &str) -> Result<()> {
        let identity = self.identity()?;
        self.backend.delete_history(&identity, id).await
    }

    /// Delete every entry owned by the current identity.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn clear_history(&self) -> Result<()> {
        let identity = self.identity()?;
        self.backend.clear_history(&identity).await
    }

    /// Fold the identity's settings rows over `base`.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn load_settings(&self, base: SettingsRecord) -> Result<SettingsRecord> {
        let identity = self.identity()?;
        let rows = self.backend.load_settings(&identity).await?;
        debug!(user_id = %identity.user_id, rows = rows.len(), "loaded remote settings");
        Ok(base.with_rows(&rows))
    }

    /// Upsert one settings field.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn set_setting(&self, field: &SettingField) -> Result<()> {
        let identity = self.identity()?;
        self.backend.upsert_setting(&identity, &field.to_row()).await
    }

    /// Profile of the current identity.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn fetch_profile(&self) -> Result<Option<UserProfile>> {
        let identity = self.identity()?;
        self.backend.fetch_profile(&identity).await
    }

    /// Create the current identity's profile row.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn create_profile(&self, fields: &ProfileUpdate) -> Result<()> {
        let identity = self.identity()?;
        self.backend.create_profile(&identity, fields).await
    }

    /// Change fields of the current identity's profile.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, otherwise backend errors.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<()> {
        let identity = self.identity()?;
        self.backend.update_profile(&identity, update).await
    }

    /// Record an upstream API call. Skipped when anonymous; failures are
    /// logged only.
    pub async fn log_api_usage(&self, usage: &ApiUsage) {
        let Ok(identity) = self.identity() else {
            return;
        };
        if let Err(e) = self.backend.log_api_usage(&identity, usage).await {
            warn!(provider = %usage.provider, error = %e, "failed to log API usage");
        }
    }
}
