//! Key-value store for device-persisted records
//!
//! This module defines the [`KeyValueStore`] contract the session layer
//! persists through, and a durable implementation backed by sled.

use async_trait::async_trait;
use sled::Db;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by [`KeyValueStore`] implementations
#[derive(Debug, Error)]
pub enum KvError {
    /// Underlying sled failure
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Stored bytes are not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// Key rejected before reaching the database
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, KvError>;

/// Asynchronous string key-value store
///
/// Values are opaque strings; callers own their serialization. Deleting a
/// missing key is not an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Where and how the device store is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvConfig {
    /// Database directory
    pub path: PathBuf,
    /// Page cache size
    pub cache_bytes: u64,
    /// Compress values on disk
    pub compression: bool,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tourbook_kv.db"),
            // The store holds a single small record.
            cache_bytes: 1024 * 1024,
            compression: true,
        }
    }
}

impl KvConfig {
    /// Store at `path` with default tuning
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Override the page cache size
    pub fn with_cache_bytes(mut self, bytes: u64) -> Self {
        self.cache_bytes = bytes;
        self
    }

    /// Toggle on-disk compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }
}

/// Sled-backed key-value store
///
/// Writes and deletes are flushed before they return, so a record written
/// before the process exits is visible to the next launch.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Db>,
}

impl KvStore {
    /// Open (or create) the store described by `config`
    pub fn new(config: KvConfig) -> Result<Self> {
        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_bytes)
            .use_compression(config.compression)
            .open()?;
        tracing::debug!(path = %config.path.display(), "Opened key-value store");

        Ok(Self { db: Arc::new(db) })
    }

    /// Store that lives only as long as the process
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn check_key(key: &str) -> Result<&[u8]> {
        if key.is_empty() {
            return Err(KvError::InvalidKey("key must not be empty".to_string()));
        }
        Ok(key.as_bytes())
    }
}

#[async_trait]
impl KeyValueStore for KvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = Self::check_key(key)?;
        self.db
            .get(key)?
            .map(|bytes| String::from_utf8(bytes.to_vec()).map_err(KvError::from))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = Self::check_key(key)?;
        self.db.insert(key, value.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = Self::check_key(key)?;
        if self.db.remove(key)?.is_some() {
            self.db.flush_async().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").field("keys", &self.db.len()).finish()
    }
}
