//! Durable local key-value storage.
//!
//! Defines the [`KeyValueStore`] trait for small JSON records that must
//! survive a process restart (the random-chat snapshot, credentials), plus
//! a file-backed implementation and an in-memory one for tests.
//!
//! Every write replaces the whole record. The file store writes to a
//! temporary sibling and renames it into place so a crash mid-write never
//! leaves a truncated record behind.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Key of the persisted random-chat snapshot.
pub const RANDOM_SESSION_KEY: &str = "random_chat_session";
/// Key of the persisted bearer token.
pub const TOKEN_KEY: &str = "jwt_token";
/// Key of the persisted authenticated user.
pub const USER_KEY: &str = "user";

/// Errors that can occur during local storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error for key {key}: {source}")]
    Io {
        /// Record key.
        key: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The stored record could not be (de)serialized.
    #[error("storage encoding error for key {key}: {source}")]
    Encoding {
        /// Record key.
        key: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Whole-record JSON storage keyed by string.
///
/// Implementations include:
/// - [`FileStore`] — one JSON file per key under a data directory
/// - [`MemoryStore`] — process-local map for tests
pub trait KeyValueStore: Send + Sync {
    /// Read the raw JSON text stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backing medium cannot be read.
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backing medium cannot be written.
    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the record stored under `key`. Removing a missing key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backing medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Read and deserialize the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encoding`] if the stored JSON does not match `T`.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        Self: Sized,
    {
        self.get_raw(key)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|source| StorageError::Encoding {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Serialize `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if serialization or the write fails.
    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        Self: Sized,
    {
        let raw = serde_json::to_string(value).map_err(|source| StorageError::Encoding {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(key, &raw)
    }
}

/// File-backed [`KeyValueStore`]: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) if raw.trim().is_empty() => Ok(None),
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(value.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &target).map_err(io_err)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// In-memory implementation of [`KeyValueStore`] for testing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a record exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.records.lock().contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.records
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.records.lock().remove(key);
        Ok(())
    }
}

impl<S: KeyValueStore> KeyValueStore for std::sync::Arc<S> {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_raw(key)
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).put_raw(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}
