//! Store status flags and the shared state cell behind both stores.

use crate::error::Result;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Observable status of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    /// Latched after the first successful load; cleared on reset.
    pub is_initialized: bool,

    /// True while any load or write is in flight.
    pub loading: bool,

    /// Message of the last failure, cleared when the next operation starts.
    pub error: Option<String>,
}

/// Load lifecycle phase derived from [`StoreStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Uninitialized,
    Loading,
    Ready,
    Error,
}

impl StoreStatus {
    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> StorePhase {
        if self.loading {
            StorePhase::Loading
        } else if self.is_initialized {
            StorePhase::Ready
        } else if self.error.is_some() {
            StorePhase::Error
        } else {
            StorePhase::Uninitialized
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    data: T,
    is_initialized: bool,
    load_in_flight: bool,
    pending: usize,
    error: Option<String>,
    /// Bumped on every reset; results of operations begun under an older
    /// generation are dropped.
    generation: u64,
}

/// Proof that an operation was started, carried to its completion.
#[derive(Debug)]
#[must_use]
pub(crate) struct Ticket {
    generation: u64,
    is_load: bool,
}

/// In-memory data plus status flags, shared by the history and settings
/// stores.
///
/// The lock is never held across an await.
#[derive(Debug)]
pub(crate) struct StoreCell<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> StoreCell<T> {
    pub(crate) fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data,
                is_initialized: false,
                load_in_flight: false,
                pending: 0,
                error: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> StoreStatus {
        let inner = self.lock();
        StoreStatus {
            is_initialized: inner.is_initialized,
            loading: inner.pending > 0,
            error: inner.error.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> T {
        self.lock().data.clone()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock().data)
    }

    /// Mutate data outside the load/write protocol.
    pub(crate) fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.lock().data);
    }

    /// Start a load unless one is in flight or the store is initialized.
    pub(crate) fn begin_load(&self) -> Option<Ticket> {
        let mut inner = self.lock();
        if inner.load_in_flight || inner.is_initialized {
            return None;
        }
        inner.load_in_flight = true;
        inner.pending += 1;
        inner.error = None;
        Some(Ticket {
            generation: inner.generation,
            is_load: true,
        })
    }

    /// Start a write.
    pub(crate) fn begin_write(&self) -> Ticket {
        let mut inner = self.lock();
        inner.pending += 1;
        inner.error = None;
        Ticket {
            generation: inner.generation,
            is_load: false,
        }
    }

    /// Latch initialized without going through a load.
    ///
    /// Returns false if the store was already initialized.
    pub(crate) fn initialize_with(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut inner = self.lock();
        if inner.is_initialized {
            return false;
        }
        f(&mut inner.data);
        inner.is_initialized = true;
        true
    }

    /// Complete an operation.
    ///
    /// On success `apply` runs against the data; on failure the error
    /// message is recorded and the data is untouched. Either way the
    /// in-flight flags are cleared. Results from before a reset only reach
    /// the caller.
    pub(crate) fn finish<R>(
        &self,
        ticket: Ticket,
        result: Result<R>,
        apply: impl FnOnce(&mut T, &R),
    ) -> Result<R> {
        self.settle(ticket, result, apply).0
    }

    /// Like [`finish`](Self::finish), but a successful result from before a
    /// reset comes back as `None`.
    pub(crate) fn finish_current<R>(
        &self,
        ticket: Ticket,
        result: Result<R>,
        apply: impl FnOnce(&mut T, &R),
    ) -> Result<Option<R>> {
        let (result, current) = self.settle(ticket, result, apply);
        result.map(|value| current.then_some(value))
    }

    /// Shared completion path; the flag is false for a stale ticket.
    fn settle<R>(
        &self,
        ticket: Ticket,
        result: Result<R>,
        apply: impl FnOnce(&mut T, &R),
    ) -> (Result<R>, bool) {
        let mut inner = self.lock();
        if ticket.generation != inner.generation {
            return (result, false);
        }

        inner.pending = inner.pending.saturating_sub(1);
        if ticket.is_load {
            inner.load_in_flight = false;
        }

        match &result {
            Ok(value) => {
                apply(&mut inner.data, value);
                if ticket.is_load {
                    inner.is_initialized = true;
                }
            }
            Err(e) => inner.error = Some(e.to_string()),
        }
        (result, true)
    }

    /// Record a failure that happened outside a ticketed operation.
    pub(crate) fn record_error(&self, message: String) {
        self.lock().error = Some(message);
    }

    /// Clear the initialized latch so the next load reads storage again.
    ///
    /// In-flight operations are orphaned: their results are not applied.
    pub(crate) fn reset_initialization(&self) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.is_initialized = false;
        inner.load_in_flight = false;
        inner.pending = 0;
        inner.error = None;
    }

    /// Reset initialization and replace the data.
    pub(crate) fn reset(&self, data: T) {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.data = data;
        inner.is_initialized = false;
        inner.load_in_flight = false;
        inner.pending = 0;
        inner.error = None;
    }
}
