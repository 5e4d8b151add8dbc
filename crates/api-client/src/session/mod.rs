//! Session Management
//!
//! This module owns the client's authentication state:
//! - Error kinds surfaced by auth operations
//! - The persisted token record and its tolerant decoding
//! - Session event callbacks
//! - The [`SessionManager`] and its single-flight token refresh
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{RestClientConfig, SessionManager};
//! use std::sync::Arc;
//! use storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new(
//!         RestClientConfig::from_env(),
//!         Arc::new(MemoryStore::new()),
//!     )?;
//!
//!     if !manager.initialize_from_storage().await {
//!         let user = manager.login("demo@example.com", "secret").await?;
//!         println!("Logged in as {}", user.name);
//!     }
//!     Ok(())
//! }
//! ```

mod manager;
mod refresh;

pub use manager::SessionManager;

use crate::auth::{TokenPair, User};
use crate::rest::RestError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Storage key of the persisted token record
pub const TOKENS_KEY: &str = "tokens";

/// Errors surfaced by authentication operations
///
/// Cloneable so a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Backend rejected the email/password combination
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Backend rejected the registration
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// Refresh token invalid/expired, or the refresh call could not complete
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Persisted token record could not be decoded
    #[error("Malformed persisted session: {0}")]
    MalformedPersistedState(String),

    /// Request timed out
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// Backend unreachable
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Operation requires tokens but none are held
    #[error("No active session")]
    NoSession,

    /// Protected request failed; carries the backend's error
    #[error("Request failed: {0}")]
    Request(#[from] RestError),
}

impl AuthError {
    /// The underlying HTTP error, for [`AuthError::Request`]
    pub fn rest_error(&self) -> Option<&RestError> {
        match self {
            AuthError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Current in-memory session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Credentials in use
    pub tokens: TokenPair,
    /// Profile; `None` until login, a successful restore, or profile setup
    pub current_user: Option<User>,
    /// Bumped each time a session is established; a refresh only applies to
    /// the generation it started from
    pub generation: u64,
}

/// On-disk shape of the token record
///
/// Every field is optional so a partially written or hand-edited record
/// still parses; [`PersistedTokenRecord::decode`] then rejects it.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTokenRecord {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl PersistedTokenRecord {
    /// Serialize a complete pair for storage
    pub fn encode(pair: &TokenPair) -> serde_json::Result<String> {
        serde_json::to_string(pair)
    }

    /// Parse a stored record, requiring both tokens to be non-empty
    pub fn decode(raw: &str) -> Result<TokenPair> {
        let record: PersistedTokenRecord = serde_json::from_str(raw)
            .map_err(|e| AuthError::MalformedPersistedState(e.to_string()))?;

        match (record.access_token, record.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok(TokenPair::new(access, refresh))
            }
            _ => Err(AuthError::MalformedPersistedState(
                "record is missing a token".to_string(),
            )),
        }
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A user became signed in (login, restore, profile setup)
    Create,
    /// Tokens were rotated by a refresh
    Update,
    /// Refresh failed and the session was dropped
    Expired,
    /// The user logged out
    Cleared,
}

/// Session event callback; receives the current user, if any
pub type SessionCallback = Arc<dyn Fn(SessionEvent, Option<&User>) + Send + Sync>;

/// Handle for removing a callback registered with
/// [`SessionManager::on_session_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(pub(crate) u64);
