//! Backend selection and the store context.
//!
//! The backend is a pure function of identity presence: anonymous callers
//! use local storage, signed-in callers use the hosted backend. A switch
//! never merges data between backends.

use crate::core::{ApiUsage, Identity, ProfileUpdate, UserProfile};
use crate::error::{Error, Result};
use crate::session::SessionProvider;
use crate::storage::{LocalAdapter, RemoteAdapter};
use crate::store::history::HistoryStore;
use crate::store::settings::SettingsStore;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which kind of storage a store persists through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Persistence adapter behind a store.
#[derive(Debug, Clone)]
pub enum Backend {
    Local(LocalAdapter),
    Remote(RemoteAdapter),
}

impl Backend {
    /// Kind of this backend.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }

    /// Whether this is the hosted backend.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Outcome of backend selection for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Local,
    Remote(Identity),
}

impl Selection {
    /// Kind of the selected backend.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

/// Choose a backend from identity presence.
///
/// Without a configured hosted backend everyone uses local storage.
#[must_use]
pub fn select_backend(identity: Option<Identity>, remote_configured: bool) -> Selection {
    match identity {
        Some(identity) if remote_configured => Selection::Remote(identity),
        _ => Selection::Local,
    }
}

/// History and settings stores sharing one backend.
#[derive(Debug)]
pub struct Stores {
    pub history: HistoryStore,
    pub settings: SettingsStore,
}

impl Stores {
    fn new(backend: &Backend, mirror: &LocalAdapter) -> Self {
        Self {
            history: HistoryStore::new(backend.clone()),
            settings: SettingsStore::new(backend.clone(), mirror.clone()),
        }
    }
}

/// Owns one store pair per backend and routes each call to the pair the
/// current identity selects.
#[derive(Debug)]
pub struct StoreContext {
    session: SessionProvider,
    local_adapter: LocalAdapter,
    local: Stores,
    remote: Option<(RemoteAdapter, Stores)>,
}

impl StoreContext {
    /// Build a context. `remote` must read identity from `session`.
    #[must_use]
    pub fn new(
        session: SessionProvider,
        local: LocalAdapter,
        remote: Option<RemoteAdapter>,
    ) -> Self {
        let local_stores = Stores::new(&Backend::Local(local.clone()), &local);
        let remote = remote.map(|adapter| {
            let stores = Stores::new(&Backend::Remote(adapter.clone()), &local);
            (adapter, stores)
        });
        Self {
            session,
            local_adapter: local,
            local: local_stores,
            remote,
        }
    }

    /// The session identity is read from.
    #[must_use]
    pub fn session(&self) -> &SessionProvider {
        &self.session
    }

    /// The local adapter shared by every store.
    #[must_use]
    pub fn local_adapter(&self) -> &LocalAdapter {
        &self.local_adapter
    }

    /// Backend selection for the current identity.
    #[must_use]
    pub fn selection(&self) -> Selection {
        select_backend(self.session.current_identity(), self.remote.is_some())
    }

    /// Store pair for the current identity.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        match (self.selection(), &self.remote) {
            (Selection::Remote(_), Some((_, stores))) => stores,
            _ => &self.local,
        }
    }

    /// History store for the current identity.
    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.stores().history
    }

    /// Settings store for the current identity.
    #[must_use]
    pub fn settings(&self) -> &SettingsStore {
        &self.stores().settings
    }

    /// Load both stores of the selected backend.
    ///
    /// Loads run concurrently; each store records its own failure.
    ///
    /// # Errors
    ///
    /// The history error if that load failed, otherwise the settings error.
    pub async fn initialize(&self) -> Result<()> {
        let stores = self.stores();
        debug!(backend = %self.selection().kind(), "initializing stores");
        let (history, settings) =
            tokio::join!(stores.history.load_history(), stores.settings.load_settings());
        history.and(settings)
    }

    /// React to an identity change.
    ///
    /// Every store forgets it was initialized. Remote stores also drop their
    /// in-memory data so nothing from the previous identity survives;
    /// local stores keep theirs until the next load replaces it.
    pub fn handle_identity_change(&self) {
        info!(backend = %self.selection().kind(), "identity changed, resetting stores");
        self.local.history.reset_initialization();
        self.local.settings.reset_initialization();
        if let Some((_, stores)) = &self.remote {
            stores.history.discard();
            stores.settings.discard();
        }
    }

    /// Follow identity changes for the lifetime of the session: reset the
    /// stores, then load the newly selected backend.
    #[must_use]
    pub fn watch_identity(self: &Arc<Self>) -> JoinHandle<()> {
        let context = Arc::clone(self);
        let mut changes = self.session.subscribe();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                context.handle_identity_change();
                if let Err(e) = context.initialize().await {
                    warn!(error = %e, "store reload after identity change failed");
                }
            }
        })
    }

    /// Profile for the current identity.
    ///
    /// Anonymous callers get a local profile built from the local usage
    /// counters.
    ///
    /// # Errors
    ///
    /// `NotFound` if the signed-in user has no profile row, otherwise
    /// storage or backend errors.
    pub async fn profile(&self) -> Result<UserProfile> {
        match (self.selection(), &self.remote) {
            (Selection::Remote(identity), Some((adapter, _))) => adapter
                .fetch_profile()
                .await?
                .ok_or_else(|| Error::NotFound(format!("profile for {}", identity.user_id))),
            _ => Ok(UserProfile {
                id: "local".to_string(),
                display_name: Some("Local user".to_string()),
                last_analysis: self.local_adapter.last_analysis()?,
                stats: self.local_adapter.load_stats()?,
                ..UserProfile::default()
            }),
        }
    }

    /// Create the signed-in user's profile row, then read it back.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` when anonymous, otherwise backend errors.
    pub async fn create_profile(&self, fields: &ProfileUpdate) -> Result<UserProfile> {
        let adapter = self.signed_in_adapter()?;
        adapter.create_profile(fields).await?;
        info!("profile created");
        self.profile().await
    }

    /// Change profile fields of the signed-in user, then read the profile
    /// back.
    ///
    /// # Errors
    ///
    /// `InvalidState` for an empty update, `NotAuthenticated` when
    /// anonymous, `NotFound` if no profile row exists, otherwise backend
    /// errors.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        if update.is_empty() {
            return Err(Error::InvalidState("no profile field to change".to_string()));
        }
        let adapter = self.signed_in_adapter()?;
        adapter.update_profile(update).await?;
        self.profile().await
    }

    fn signed_in_adapter(&self) -> Result<&RemoteAdapter> {
        match (self.selection(), &self.remote) {
            (Selection::Remote(_), Some((adapter, _))) => Ok(adapter),
            _ => Err(Error::NotAuthenticated),
        }
    }

    /// Record an upstream API call for the signed-in user. Anonymous calls
    /// and failures are ignored.
    pub async fn log_api_usage(&self, usage: &ApiUsage) {
        if let Some((adapter, _)) = &self.remote {
            adapter.log_api_usage(usage).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewHistoryEntry;
    use crate::storage::memory::{MemoryRemote, RemoteOp};
    use crate::storage::MemoryKeyValueStore;

    fn context() -> (Arc<StoreContext>, Arc<MemoryRemote>) {
        let session = SessionProvider::new();
        let local = LocalAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        let remote = Arc::new(MemoryRemote::new());
        let adapter = RemoteAdapter::new(session.clone(), remote.clone());
        (
            Arc::new(StoreContext::new(session, local, Some(adapter))),
            remote,
        )
    }

    #[test]
    fn selection_follows_identity() {
        assert_eq!(select_backend(None, true), Selection::Local);
        assert_eq!(
            select_backend(Some(Identity::new("u-1")), true),
            Selection::Remote(Identity::new("u-1"))
        );
        assert_eq!(select_backend(Some(Identity::new("u-1")), false), Selection::Local);
    }

    #[test]
    fn routes_by_identity() {
        let (ctx, _remote) = context();
        assert_eq!(ctx.history().backend().kind(), BackendKind::Local);

        ctx.session().sign_in(Identity::new("u-1")).unwrap();
        assert_eq!(ctx.history().backend().kind(), BackendKind::Remote);
        assert_eq!(ctx.settings().backend().kind(), BackendKind::Remote);
    }

    #[tokio::test]
    async fn identity_change_resets_and_discards_remote_data() {
        let (ctx, remote) = context();
        remote.seed_entry("alice", NewHistoryEntry::new("a.png", "alice's"));
        ctx.session().sign_in(Identity::new("alice")).unwrap();
        ctx.initialize().await.unwrap();
        assert_eq!(ctx.history().entries().len(), 1);

        ctx.session().sign_in(Identity::new("bob")).unwrap();
        ctx.handle_identity_change();
        assert!(ctx.history().entries().is_empty());
        assert!(!ctx.history().status().is_initialized);
        assert!(!ctx.settings().status().is_initialized);

        ctx.initialize().await.unwrap();
        assert!(ctx.history().entries().is_empty());
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 2);
    }

    #[tokio::test]
    async fn watcher_reloads_after_sign_in() {
        let (ctx, remote) = context();
        let watcher = ctx.watch_identity();

        ctx.session().sign_in(Identity::new("u-1")).unwrap();
        while !ctx.history().status().is_initialized {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 1);
        watcher.abort();
    }

    #[tokio::test]
    async fn local_profile_uses_local_counters() {
        let (ctx, _remote) = context();
        ctx.history()
            .add_entry(NewHistoryEntry::new("a.png", "a"))
            .await
            .unwrap();

        let profile = ctx.profile().await.unwrap();
        assert_eq!(profile.id, "local");
        assert_eq!(profile.stats.total_analyses, 1);
        assert!(profile.last_analysis.is_some());
    }

    #[tokio::test]
    async fn missing_remote_profile_is_not_found() {
        let (ctx, _remote) = context();
        ctx.session().sign_in(Identity::new("u-1")).unwrap();
        assert!(matches!(ctx.profile().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn created_profile_can_be_renamed() {
        let (ctx, remote) = context();
        ctx.session()
            .sign_in(Identity::new("u-1").with_email("u1@example.com"))
            .unwrap();

        let created = ctx
            .create_profile(&ProfileUpdate::display_name("Ada"))
            .await
            .unwrap();
        assert_eq!(created.display_name.as_deref(), Some("Ada"));
        assert_eq!(created.email.as_deref(), Some("u1@example.com"));

        let renamed = ctx
            .update_profile(&ProfileUpdate::display_name("Ada L."))
            .await
            .unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("Ada L."));
        assert_eq!(remote.calls(RemoteOp::UpdateProfile), 1);
    }

    #[tokio::test]
    async fn profile_edits_need_a_signed_in_user() {
        let (ctx, remote) = context();
        assert!(matches!(
            ctx.update_profile(&ProfileUpdate::display_name("Ada")).await,
            Err(Error::NotAuthenticated)
        ));
        assert!(matches!(
            ctx.create_profile(&ProfileUpdate::default()).await,
            Err(Error::NotAuthenticated)
        ));

        ctx.session().sign_in(Identity::new("u-1")).unwrap();
        assert!(matches!(
            ctx.update_profile(&ProfileUpdate::default()).await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(remote.calls(RemoteOp::UpdateProfile), 0);
    }
}
