//! Test fixtures for session and resource tests

#![allow(dead_code)]

use crate::auth::User;
use crate::rest::{RestClient, RestClientConfig};
use crate::session::SessionManager;
use serde_json::{json, Value};
use std::sync::Arc;
use storage::MemoryStore;
use wiremock::MockServer;

/// The user every fixture response signs in as
pub fn demo_user() -> User {
    User {
        id: "user-1".to_string(),
        email: "demo@example.com".to_string(),
        name: "Demo Traveller".to_string(),
        avatar: None,
        role: Some("user".to_string()),
    }
}

/// Login success envelope
pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "success": true,
        "data": {
            "user": demo_user(),
            "accessToken": access,
            "refreshToken": refresh
        }
    })
}

/// Refresh success envelope, including the user
pub fn refreshed_body(access: &str, refresh: &str) -> Value {
    token_body(access, refresh)
}

/// Envelope the backend sends with a `401`
pub fn unauthorized_body() -> Value {
    json!({"success": false, "message": "Token expired"})
}

/// Session manager pointed at `server`, persisting into `store`
pub fn manager_for(server: &MockServer, store: MemoryStore) -> SessionManager {
    init_tracing();
    let client = RestClient::new(RestClientConfig::new(server.uri()))
        .expect("failed to build test client");
    SessionManager::with_client(client, Arc::new(store))
}

/// Route `tracing` output to the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
