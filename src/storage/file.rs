//! File-based key-value storage.

use crate::error::{Error, Result};
use crate::storage::traits::KeyValueStore;
use std::fs;
use std::path::{Path, PathBuf};

/// File-based key-value store with atomic writes.
///
/// Each namespace is one file under `<base_dir>/local/`.
#[derive(Debug)]
pub struct FileKeyValueStore {
    base_dir: PathBuf,
    /// Maximum total bytes across all namespaces; 0 disables the check.
    quota_bytes: u64,
}

impl FileKeyValueStore {
    /// Create a new file store with no quota.
    ///
    /// Creates the storage directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be created.
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_dir.join("local"))?;
        Ok(Self {
            base_dir,
            quota_bytes: 0,
        })
    }

    /// Limit the total size of stored values.
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn local_dir(&self) -> PathBuf {
        self.base_dir.join("local")
    }

    /// Get the path to a namespace file.
    fn namespace_path(&self, namespace: &str) -> PathBuf {
        let file_name: String = namespace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.local_dir().join(format!("{file_name}.json"))
    }

    /// Bytes currently stored, excluding one namespace.
    fn used_bytes_excluding(&self, excluded: &Path) -> Result<u64> {
        let mut used = 0;
        for entry in fs::read_dir(self.local_dir())? {
            let path = entry?.path();
            if path == excluded || !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            used += fs::metadata(&path)?.len();
        }
        Ok(used)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read(&self, namespace: &str) -> Result<Option<String>> {
        let path = self.namespace_path(namespace);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path)?))
    }

    fn write(&self, namespace: &str, value: &str) -> Result<()> {
        let path = self.namespace_path(namespace);

        if self.quota_bytes > 0 {
            let needed = self.used_bytes_excluding(&path)? + value.len() as u64;
            if needed > self.quota_bytes {
                return Err(Error::QuotaExceeded {
                    namespace: namespace.to_string(),
                    needed,
                    quota: self.quota_bytes,
                });
            }
        }

        // Write to temp file first, then rename over the old value
        let temp = path.with_extension("tmp");
        fs::write(&temp, value)?;
        fs::rename(&temp, &path)?;

        Ok(())
    }

    fn delete(&self, namespace: &str) -> Result<()> {
        let path = self.namespace_path(namespace);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
