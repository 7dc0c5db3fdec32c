//! Error types for repromp.

use std::io;
use thiserror::Error;

/// Result type alias for repromp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in repromp operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote operation was attempted with no signed-in identity.
    #[error("User not authenticated")]
    NotAuthenticated,

    /// The hosted backend rejected or failed a request.
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP transport error talking to the hosted backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local storage I/O error.
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// Local storage write would exceed the configured quota.
    #[error("Storage quota exceeded writing {namespace}: {needed} bytes needed, quota is {quota}")]
    QuotaExceeded {
        /// Namespace being written.
        namespace: String,
        /// Total bytes the store would hold after the write.
        needed: u64,
        /// Configured quota in bytes.
        quota: u64,
    },

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid state encountered.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested item does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Settings import document is malformed.
    #[error("Invalid settings file: {0}")]
    InvalidImport(String),

    /// Access gate is locked after too many failed attempts.
    #[error("Too many attempts, try again in {remaining_secs}s")]
    GateLocked {
        /// Seconds until the lockout expires.
        remaining_secs: i64,
    },

    /// Wrong access password.
    #[error("Wrong password, {remaining_attempts} attempt(s) left")]
    GateDenied {
        /// Attempts left before lockout.
        remaining_attempts: u32,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
