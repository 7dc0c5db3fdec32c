//! Storage backends and persistence adapters.

pub mod file;
pub mod local;
pub mod memory;
pub mod postgrest;
pub mod remote;
pub mod traits;

pub use file::FileKeyValueStore;
pub use local::LocalAdapter;
pub use memory::{MemoryKeyValueStore, MemoryRemote};
pub use postgrest::PostgrestBackend;
pub use remote::RemoteAdapter;
pub use traits::{KeyValueStore, RemoteBackend};
