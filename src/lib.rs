//! Tourbook client core
//!
//! Wires the device key-value store, the session manager and the observable
//! auth store together. Call [`bootstrap`] once at start-up; it restores any
//! persisted session before returning.
//!
//! # Example
//!
//! ```rust,no_run
//! use tourbook::{bootstrap, init_logging, TourbookConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let auth = bootstrap(TourbookConfig::from_env()).await?;
//!     if !auth.is_authenticated() {
//!         auth.login("demo@example.com", "password123").await?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use api_client;
pub use app_state;
pub use storage;

use api_client::{AuthError, RestClientConfig, SessionManager};
use app_state::AuthStore;
use std::sync::Arc;
use storage::{KeyValueStore, KvConfig, KvError, KvStore};
use thiserror::Error;

/// Environment variable overriding the key-value database path
pub const DB_PATH_ENV: &str = "TOURBOOK_DB_PATH";

/// Errors raised while starting the client
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Key-value store could not be opened
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),

    /// Session manager could not be built
    #[error("Client error: {0}")]
    Client(#[from] AuthError),
}

/// Top-level client configuration
#[derive(Debug, Clone, Default)]
pub struct TourbookConfig {
    /// Backend connection
    pub api: RestClientConfig,
    /// Token store
    pub storage: KvConfig,
}

impl TourbookConfig {
    /// Create a config from its parts
    pub fn new(api: RestClientConfig, storage: KvConfig) -> Self {
        Self { api, storage }
    }

    /// Read overrides from the environment
    pub fn from_env() -> Self {
        let storage = match std::env::var(DB_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => KvConfig::new(path.trim()),
            _ => KvConfig::default(),
        };

        Self { api: RestClientConfig::from_env(), storage }
    }

    /// Set the backend connection
    pub fn with_api(mut self, api: RestClientConfig) -> Self {
        self.api = api;
        self
    }

    /// Set the token store
    pub fn with_storage(mut self, storage: KvConfig) -> Self {
        self.storage = storage;
        self
    }
}

/// Open the token store, build the session manager and restore the session
pub async fn bootstrap(config: TourbookConfig) -> Result<AuthStore, BootstrapError> {
    let store = KvStore::new(config.storage)?;
    bootstrap_with_store(config.api, Arc::new(store)).await
}

/// [`bootstrap`] over a caller-supplied store
pub async fn bootstrap_with_store(
    api: RestClientConfig,
    store: Arc<dyn KeyValueStore>,
) -> Result<AuthStore, BootstrapError> {
    tracing::info!(base_url = %api.base_url, "Starting Tourbook client");

    let manager = Arc::new(SessionManager::new(api, store)?);
    let auth = AuthStore::new(manager);
    let snapshot = auth.initialize().await;

    tracing::info!(authenticated = snapshot.is_authenticated, "Client ready");
    Ok(auth)
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`)
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
