//! Durable storage backends for credential records.
//!
//! A backend stores opaque string records by key. Serialization and the
//! "absent on failure" policy live in `CredentialStore`; backends only
//! report what happened.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;

/// Application name used for the default storage directory and keyring service.
pub const APP_NAME: &str = "tokenauth";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Could not determine a storage directory")]
    NoStorageDir,

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Key/value storage for serialized records.
pub trait StorageBackend: Send + Sync {
    /// Read a record, `Ok(None)` if nothing is stored under `key`.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Overwrite the record under `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the record under `key`. Removing a missing record is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================================================
// File storage
// ============================================================================

/// One `<key>.json` file per record in a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage under the platform's local data directory.
    pub fn default_location() -> Result<Self, StorageError> {
        let data_dir = dirs::data_local_dir().ok_or(StorageError::NoStorageDir)?;
        Ok(Self::new(data_dir.join(APP_NAME)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.record_path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a unique temp file then rename over the record, so a reader
    /// never observes a half-written record.
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        std::fs::create_dir_all(&self.dir)?;
        let path = self.record_path(key);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self
            .dir
            .join(format!("{}.json.{}.{}.tmp", key, std::process::id(), seq));
        std::fs::write(&tmp_path, value)?;
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Keyring storage
// ============================================================================

/// OS keychain storage: one keyring entry per record key under a service name.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new(APP_NAME)
    }
}

impl StorageBackend for KeyringStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Memory storage
// ============================================================================

/// In-process storage; records vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::Poisoned)?;
        records.remove(key);
        Ok(())
    }
}
