//! History store: an in-memory list of entries, newest first, backed by one
//! persistence adapter.

use crate::core::{HistoryEntry, NewHistoryEntry};
use crate::error::Result;
use crate::store::selector::Backend;
use crate::store::status::{StoreCell, StoreStatus};
use tracing::debug;

/// History store.
#[derive(Debug)]
pub struct HistoryStore {
    backend: Backend,
    cell: StoreCell<Vec<HistoryEntry>>,
}

impl HistoryStore {
    /// Empty, uninitialized store over `backend`.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            cell: StoreCell::new(Vec::new()),
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

    /// Snapshot of the in-memory list, newest first.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.cell.snapshot()
    }

    /// In-memory entry by id.
    #[must_use]
    pub fn get_entry(&self, id: &str) -> Option<HistoryEntry> {
        self.cell
            .read(|entries| entries.iter().find(|e| e.id == id).cloned())
    }

    /// Replace the list with what the backend holds.
    ///
    /// Does nothing if a load is in flight or the store is already
    /// initialized.
    ///
    /// # Errors
    ///
    /// Backend errors; the list is left unchanged and the error recorded.
    pub async fn load_history(&self) -> Result<()> {
        let Some(ticket) = self.cell.begin_load() else {
            debug!(backend = %self.backend.kind(), "history already loading or loaded");
            return Ok(());
        };

        let result = match &self.backend {
            Backend::Local(local) => local.load_history(),
            Backend::Remote(remote) => remote.load_history().await,
        };
        self.cell
            .finish(ticket, result, |entries, loaded| entries.clone_from(loaded))
            .map(|_| ())
    }

    /// Persist a new entry and put it at the head of the list.
    ///
    /// # Errors
    ///
    /// Backend errors; the list is left unchanged and the error recorded.
    pub async fn add_entry(&self, entry: NewHistoryEntry) -> Result<HistoryEntry> {
        let ticket = self.cell.begin_write();
        let result = match &self.backend {
            Backend::Local(local) => local.add_history_entry(entry),
            Backend::Remote(remote) => remote.add_history_entry(&entry).await,
        };
        self.cell.finish(ticket, result, |entries, stored| {
            entries.insert(0, stored.clone());
        })
    }

    /// Delete an entry by id.
    ///
    /// # Errors
    ///
    /// Backend errors; the list is left unchanged and the error recorded.
    pub async fn remove_entry(&self, id: &str) -> Result<()> {
        let ticket = self.cell.begin_write();
        let result = match &self.backend {
            Backend::Local(local) => local.remove_history_entry(id),
            Backend::Remote(remote) => remote.remove_history_entry(id).await,
        };
        self.cell
            .finish(ticket, result, |entries, ()| entries.retain(|e| e.id != id))
    }

    /// Delete every entry.
    ///
    /// # Errors
    ///
    /// Backend errors; the list is left unchanged and the error recorded.
    pub async fn clear_history(&self) -> Result<()> {
        let ticket = self.cell.begin_write();
        let result = match &self.backend {
            Backend::Local(local) => local.clear_history(),
            Backend::Remote(remote) => remote.clear_history().await,
        };
        self.cell.finish(ticket, result, |entries, ()| entries.clear())
    }

    /// Clear the initialized latch so the next load reads the backend.
    pub fn reset_initialization(&self) {
        self.cell.reset_initialization();
    }

    /// Drop the in-memory list and reset initialization.
    pub fn discard(&self) {
        self.cell.reset(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Identity;
    use crate::error::Error;
    use crate::session::SessionProvider;
    use crate::storage::memory::{MemoryRemote, RemoteOp};
    use crate::storage::{LocalAdapter, MemoryKeyValueStore, RemoteAdapter};
    use crate::store::StorePhase;
    use std::sync::Arc;

    fn local_store() -> HistoryStore {
        let local = LocalAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        HistoryStore::new(Backend::Local(local))
    }

    fn remote_store() -> (Arc<HistoryStore>, Arc<MemoryRemote>, SessionProvider) {
        let session = SessionProvider::new();
        session.sign_in(Identity::new("u-1")).unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let adapter = RemoteAdapter::new(session.clone(), remote.clone());
        (
            Arc::new(HistoryStore::new(Backend::Remote(adapter))),
            remote,
            session,
        )
    }

    async fn wait_for_calls(remote: &MemoryRemote, op: RemoteOp, n: usize) {
        while remote.calls(op) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn local_add_prepends() {
        let store = local_store();
        store.load_history().await.unwrap();
        assert_eq!(store.status().phase(), StorePhase::Ready);

        store
            .add_entry(NewHistoryEntry::new("a.png", "a"))
            .await
            .unwrap();
        let b = store
            .add_entry(NewHistoryEntry::new("b.png", "b"))
            .await
            .unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, b.id);
        assert_eq!(store.get_entry(&b.id).unwrap().image_name(), "b.png");
        assert!(!store.status().loading);
    }

    #[tokio::test]
    async fn second_load_is_a_noop() {
        let (store, remote, _session) = remote_store();
        store.load_history().await.unwrap();
        store.load_history().await.unwrap();
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 1);
    }

    #[tokio::test]
    async fn concurrent_loads_issue_one_read() {
        let (store, remote, _session) = remote_store();
        remote.seed_entry("u-1", NewHistoryEntry::new("cat.png", "a cat"));
        remote.pause();

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load_history().await })
        };
        wait_for_calls(&remote, RemoteOp::LoadHistory, 1).await;
        assert!(store.status().loading);

        // In flight: refused without touching the backend
        store.load_history().await.unwrap();
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 1);

        remote.resume();
        first.await.unwrap().unwrap();
        assert_eq!(store.entries().len(), 1);
        assert!(store.status().is_initialized);
    }

    #[tokio::test]
    async fn failed_load_records_error_and_allows_retry() {
        let (store, remote, _session) = remote_store();
        remote.fail_with(Some("connection refused"));

        assert!(store.load_history().await.is_err());
        let status = store.status();
        assert_eq!(status.phase(), StorePhase::Error);
        assert!(status.error.unwrap().contains("connection refused"));

        remote.fail_with(None);
        store.load_history().await.unwrap();
        assert_eq!(store.status().phase(), StorePhase::Ready);
        assert_eq!(remote.calls(RemoteOp::LoadHistory), 2);
    }

    #[tokio::test]
    async fn failed_remove_leaves_list() {
        let (store, remote, _session) = remote_store();
        let seeded = remote.seed_entry("u-1", NewHistoryEntry::new("cat.png", "a cat"));
        store.load_history().await.unwrap();

        remote.fail_op(RemoteOp::DeleteHistory, "timeout");
        assert!(store.remove_entry(&seeded.id).await.is_err());
        assert_eq!(store.entries().len(), 1);
        assert!(store.status().error.is_some());
        assert!(!store.status().loading);
    }

    #[tokio::test]
    async fn anonymous_remote_records_not_authenticated() {
        let (store, _remote, session) = remote_store();
        session.sign_out().unwrap();

        let err = store.clear_history().await.unwrap_err();
        assert!(matches!(err, Error::NotAuthenticated));
        assert_eq!(
            store.status().error.as_deref(),
            Some("User not authenticated")
        );
    }

    #[tokio::test]
    async fn discard_drops_in_flight_load() {
        let (store, remote, _session) = remote_store();
        remote.seed_entry("u-1", NewHistoryEntry::new("old.png", "old"));
        remote.pause();

        let stale = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.load_history().await })
        };
        wait_for_calls(&remote, RemoteOp::LoadHistory, 1).await;

        store.discard();
        remote.resume();
        stale.await.unwrap().unwrap();

        assert!(store.entries().is_empty());
        assert!(!store.status().is_initialized);
        assert!(!store.status().loading);
    }

    #[tokio::test]
    async fn clear_empties_list() {
        let store = local_store();
        store
            .add_entry(NewHistoryEntry::new("a.png", "a"))
            .await
            .unwrap();
        store.clear_history().await.unwrap();
        assert!(store.entries().is_empty());

        // Reload from storage agrees
        store.reset_initialization();
        store.load_history().await.unwrap();
        assert!(store.entries().is_empty());
    }
}
