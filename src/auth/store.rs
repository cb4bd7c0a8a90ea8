//! Secret storage backends for tokens
//!
//! Values are opaque bytes keyed by name. Every operation is atomic on its
//! own; callers that need multi-key consistency serialize access themselves.

use base64::Engine;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Key/value secret storage
pub trait SecretStore: Send + Sync {
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Platform keychain via the `keyring` crate
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::Store(format!("keyring entry {}: {}", key, e)))
    }
}

impl SecretStore for KeyringStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        tracing::debug!(service = %self.service, key, "keyring set");
        self.entry(key)?
            .set_secret(value)
            .map_err(|e| Error::Store(format!("failed to store {}: {}", key, e)))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_secret() {
            Ok(bytes) => Ok(Some(bytes)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Store(format!("failed to read {}: {}", key, e))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        tracing::debug!(service = %self.service, key, "keyring delete");
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Store(format!("failed to delete {}: {}", key, e))),
        }
    }
}

/// Base64 values in a single owner-only TOML file.
///
/// For hosts without a usable keyring (headless Linux, containers).
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::Store(format!("failed to read {}: {}", self.path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Store(format!("failed to parse {}: {}", self.path.display(), e)))
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let io_err = |what: &str, e: std::io::Error| {
            Error::Store(format!("failed to {} {}: {}", what, self.path.display(), e))
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err("create directory for", e))?;
        }
        let content = toml::to_string(entries)
            .map_err(|e| Error::Store(format!("failed to serialize secrets: {}", e)))?;

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content).map_err(|e| io_err("write", e))?;
        restrict_permissions(&tmp).map_err(|e| io_err("set permissions on", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| io_err("replace", e))?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl SecretStore for FileStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.read_all()?;
        entries.insert(
            key.to_string(),
            base64::engine::general_purpose::STANDARD.encode(value),
        );
        self.write_all(&entries)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.guard();
        let entries = self.read_all()?;
        match entries.get(key) {
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(|e| Error::Store(format!("corrupt entry {}: {}", key, e))),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.guard();
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

/// In-memory store for tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
impl SecretStore for MemoryStore {
    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
