//! CLI command implementations.

pub mod auth;
pub mod history;
pub mod profile;
pub mod settings;
pub mod unlock;

use crate::config::{Config, load_config};
use crate::error::{Error, Result};
use crate::gate::AccessGate;
use crate::session::SessionProvider;
use crate::storage::{
    FileKeyValueStore, KeyValueStore, LocalAdapter, PostgrestBackend, RemoteAdapter, RemoteBackend,
};
use crate::store::StoreContext;
use chrono::{DateTime, Local, Utc};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Everything a command needs, wired from configuration.
#[derive(Debug)]
pub struct App {
    pub config: Config,
    pub context: StoreContext,
    pub gate: AccessGate,
}

impl App {
    /// Load configuration and open storage.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid or storage cannot be
    /// opened.
    pub fn open() -> Result<Self> {
        let config = load_config()?;
        let store = FileKeyValueStore::new(config.storage.path.clone())?
            .with_quota(config.storage.quota_bytes);
        let remote: Option<Arc<dyn RemoteBackend>> = if config.remote.is_enabled() {
            Some(Arc::new(PostgrestBackend::from_config(&config.remote)?))
        } else {
            None
        };
        Self::with_backends(config, Arc::new(store), remote)
    }

    /// Wire an app over explicit backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted session cannot be read.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Result<Self> {
        let local = LocalAdapter::new(Arc::clone(&store));
        let session = SessionProvider::persistent(local.clone())?;
        let remote = remote.map(|backend| {
            RemoteAdapter::new(session.clone(), backend)
                .with_history_limit(config.remote.history_limit)
        });
        let context = StoreContext::new(session, local, remote);
        let gate = AccessGate::new(store, config.gate.clone());
        Ok(Self {
            config,
            context,
            gate,
        })
    }

    /// Fail unless the access gate is open.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the gate is closed or locked.
    pub fn require_unlocked(&self) -> Result<()> {
        if self.gate.state()?.is_open() {
            Ok(())
        } else {
            Err(Error::InvalidState(
                "access is locked; run `repromp unlock` first".to_string(),
            ))
        }
    }
}

/// Read one line from stdin after printing `prompt` to stderr.
pub(crate) fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Format UTC time as local time for display.
pub(crate) fn format_local_time(utc: DateTime<Utc>) -> String {
    let local: DateTime<Local> = utc.into();
    local.format("%Y-%m-%d %H:%M").to_string()
}

/// First line of `text`, cut to `max` characters.
pub(crate) fn preview(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    if first_line.chars().count() > max {
        let cut: String = first_line.chars().take(max).collect();
        format!("{cut}...")
    } else {
        first_line.to_string()
    }
}

/// Show only the edges of a secret.
pub(crate) fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    match chars.len() {
        0 => "(not set)".to_string(),
        1..=8 => "*".repeat(chars.len()),
        n => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}
