//! In-memory key-value store
//!
//! Used by tests and by sessions that must not outlive the process.

use crate::kv::{KeyValueStore, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-local [`KeyValueStore`]
///
/// Clones share the same underlying map, so a test can keep a handle to
/// inspect what the session layer wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries: Arc::new(Mutex::new(map)) }
    }

    /// Synchronous read, for assertions
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
