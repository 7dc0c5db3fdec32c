//! Unified store interface over local and remote persistence.

pub mod history;
pub mod selector;
pub mod settings;
pub mod status;

pub use history::HistoryStore;
pub use selector::{select_backend, Backend, BackendKind, Selection, StoreContext, Stores};
pub use settings::{SettingsExport, SettingsStore};
pub use status::{StorePhase, StoreStatus};
