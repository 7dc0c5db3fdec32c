//! Password access gate.
//!
//! Attempts, lockout and unlock state live in local storage so they carry
//! across processes. Timestamps are stored as epoch milliseconds.

use crate::config::GateConfig;
use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use chrono::{DateTime, TimeDelta, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const AUTH: &str = "repromp_auth";
const AUTH_TIME: &str = "repromp_auth_time";
const ATTEMPTS: &str = "repromp_attempts";
const BLOCKED: &str = "repromp_blocked";
const BLOCK_TIME: &str = "repromp_block_time";

/// Gate state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// No password configured.
    Disabled,
    /// A previous unlock is still valid.
    Unlocked { expires_at: DateTime<Utc> },
    /// Too many failures; wait out the lockout.
    Locked { remaining_secs: i64 },
    /// Password required.
    Closed { attempts: u32 },
}

impl GateState {
    /// Whether the caller may proceed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Disabled | Self::Unlocked { .. })
    }
}

/// Password access gate.
pub struct AccessGate {
    store: Arc<dyn KeyValueStore>,
    config: GateConfig,
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("enabled", &self.config.is_enabled())
            .field("max_attempts", &self.config.max_attempts)
            .finish_non_exhaustive()
    }
}

fn digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

impl AccessGate {
    /// Gate over `store` with the given settings.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, config: GateConfig) -> Self {
        Self { store, config }
    }

    fn read_millis(&self, namespace: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .read(namespace)?
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    fn write_millis(&self, namespace: &str, at: DateTime<Utc>) -> Result<()> {
        self.store.write(namespace, &at.timestamp_millis().to_string())
    }

    fn flag(&self, namespace: &str) -> Result<bool> {
        Ok(self.store.read(namespace)?.as_deref() == Some("true"))
    }

    fn attempts(&self) -> Result<u32> {
        Ok(self
            .store
            .read(ATTEMPTS)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }

    /// End of an unlock that started at `from`.
    fn unlock_expiry(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        TimeDelta::try_hours(self.config.session_hours)
            .and_then(|d| from.checked_add_signed(d))
            .ok_or_else(|| {
                Error::Config(format!(
                    "gate.session_hours out of range: {}",
                    self.config.session_hours
                ))
            })
    }

    /// End of a lockout that started at `from`.
    fn lockout_expiry(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        TimeDelta::try_seconds(self.config.block_seconds)
            .and_then(|d| from.checked_add_signed(d))
            .ok_or_else(|| {
                Error::Config(format!(
                    "gate.block_seconds out of range: {}",
                    self.config.block_seconds
                ))
            })
    }

    fn clear(&self, namespaces: &[&str]) -> Result<()> {
        for namespace in namespaces {
            self.store.delete(namespace)?;
        }
        Ok(())
    }

    /// Current state.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read or written.
    pub fn state(&self) -> Result<GateState> {
        self.state_at(Utc::now())
    }

    /// State at `now`. Expired unlocks and lockouts are cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be read or written.
    pub fn state_at(&self, now: DateTime<Utc>) -> Result<GateState> {
        if !self.config.is_enabled() {
            return Ok(GateState::Disabled);
        }

        if self.flag(AUTH)? {
            if let Some(at) = self.read_millis(AUTH_TIME)? {
                let expires_at = self.unlock_expiry(at)?;
                if now < expires_at {
                    return Ok(GateState::Unlocked { expires_at });
                }
            }
            debug!("clearing expired unlock");
            self.clear(&[AUTH, AUTH_TIME])?;
        }

        if self.flag(BLOCKED)? {
            if let Some(at) = self.read_millis(BLOCK_TIME)? {
                let remaining = self.lockout_expiry(at)? - now;
                if remaining > TimeDelta::zero() {
                    // Round up so a fraction of a second still reads as locked
                    let remaining_secs = (remaining.num_milliseconds() + 999) / 1000;
                    return Ok(GateState::Locked { remaining_secs });
                }
            }
            debug!("clearing expired lockout");
            self.clear(&[BLOCKED, BLOCK_TIME, ATTEMPTS])?;
        }

        Ok(GateState::Closed {
            attempts: self.attempts()?,
        })
    }

    /// Try a password now.
    ///
    /// # Errors
    ///
    /// See [`unlock_at`](Self::unlock_at).
    pub fn unlock(&self, password: &str) -> Result<GateState> {
        self.unlock_at(password, Utc::now())
    }

    /// Try a password at `now`.
    ///
    /// # Errors
    ///
    /// `GateLocked` during a lockout, `GateDenied` on a wrong password,
    /// `InvalidState` for an empty password, or storage errors.
    pub fn unlock_at(&self, password: &str, now: DateTime<Utc>) -> Result<GateState> {
        let attempts = match self.state_at(now)? {
            open @ (GateState::Disabled | GateState::Unlocked { .. }) => return Ok(open),
            GateState::Locked { remaining_secs } => {
                return Err(Error::GateLocked { remaining_secs });
            }
            GateState::Closed { attempts } => attempts,
        };

        if password.trim().is_empty() {
            return Err(Error::InvalidState("password is empty".to_string()));
        }

        if digest(password).eq_ignore_ascii_case(self.config.password_sha256.trim()) {
            let expires_at = self.unlock_expiry(now)?;
            self.store.write(AUTH, "true")?;
            self.write_millis(AUTH_TIME, now)?;
            self.clear(&[ATTEMPTS, BLOCKED, BLOCK_TIME])?;
            info!("access gate unlocked");
            return Ok(GateState::Unlocked { expires_at });
        }

        let attempts = attempts + 1;
        self.store.write(ATTEMPTS, &attempts.to_string())?;

        if attempts >= self.config.max_attempts {
            self.lockout_expiry(now)?;
            self.store.write(BLOCKED, "true")?;
            self.write_millis(BLOCK_TIME, now)?;
            warn!(attempts, "access gate locked");
            return Err(Error::GateLocked {
                remaining_secs: self.config.block_seconds,
            });
        }

        Err(Error::GateDenied {
            remaining_attempts: self.config.max_attempts - attempts,
        })
    }

    /// Forget a previous unlock.
    ///
    /// # Errors
    ///
    /// Returns an error if local storage cannot be written.
    pub fn lock(&self) -> Result<()> {
        self.clear(&[AUTH, AUTH_TIME])
    }
}
