//! repromp - history and settings persistence for an image-to-prompt
//! assistant.
//!
//! Anonymous users are served from local storage; signed-in users from a
//! hosted backend. Both sit behind the same store interface and the backend
//! is chosen per call from identity presence.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod gate;
pub mod session;
pub mod storage;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
