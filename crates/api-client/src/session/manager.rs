//! Session Manager
//!
//! Owns the token pair and current user, persists credentials through a
//! [`KeyValueStore`], and recovers from expired access tokens with a
//! single-flight refresh shared by every concurrent caller.
//!
//! # Features
//!
//! - Login, registration, profile completion and logout
//! - Session restore from the persisted token record at startup
//! - Bearer credential injection for outgoing requests
//! - Transparent refresh-and-replay on `401 Unauthorized`
//! - Session event callbacks

use super::refresh::{abandoned, RefreshCoordinator, RefreshOutcome, Ticket};
use super::{
    AuthError, CallbackId, PersistedTokenRecord, Result, Session, SessionCallback, SessionEvent,
    TOKENS_KEY,
};
use crate::auth::{AccountType, AuthApi, TokenPair, User};
use crate::rest::{RestClient, RestClientConfig, RestError, RestRequest, RestResponse};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storage::KeyValueStore;

/// Session manager for the Tourbook client
///
/// Shared behind an `Arc`; every method takes `&self`. State locks are never
/// held across an `.await`.
pub struct SessionManager {
    /// Client used for protected requests
    client: RestClient,

    /// Client used for `/auth/*` calls
    auth: AuthApi,

    /// Where the token record lives between launches
    storage: Arc<dyn KeyValueStore>,

    /// Current session, if any
    session: RwLock<Option<Session>>,

    /// Last session generation handed out
    generations: AtomicU64,

    /// Single-flight refresh state
    refresh: RefreshCoordinator,

    /// Session event callbacks
    callbacks: RwLock<Vec<(CallbackId, SessionCallback)>>,

    /// Last callback id handed out
    callback_ids: AtomicU64,
}

impl SessionManager {
    /// Create a session manager talking to the backend described by `config`
    pub fn new(config: RestClientConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let client = RestClient::new(config)?;
        Ok(Self::with_client(client, storage))
    }

    /// Create a session manager over an existing client
    pub fn with_client(client: RestClient, storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            auth: AuthApi::new(client.clone()),
            client,
            storage,
            session: RwLock::new(None),
            generations: AtomicU64::new(0),
            refresh: RefreshCoordinator::new(),
            callbacks: RwLock::new(Vec::new()),
            callback_ids: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Sign in with email and password
    ///
    /// On success the returned tokens are persisted and the user becomes
    /// current. On failure no state changes.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let data = self.auth.login(email, password).await?;
        let tokens = data.token_pair();
        if !tokens.is_complete() {
            return Err(AuthError::InvalidCredentials(
                "login response is missing a token".to_string(),
            ));
        }

        self.persist_tokens(&tokens).await;
        self.establish(tokens, Some(data.user.clone()));

        tracing::info!(user_id = %data.user.id, "Logged in");
        self.emit(SessionEvent::Create, Some(&data.user));
        Ok(data.user)
    }

    /// Create an account
    ///
    /// Tokens are stored but no user is set; the session stays
    /// unauthenticated until [`SessionManager::complete_profile_setup`].
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        account_type: AccountType,
    ) -> Result<TokenPair> {
        let data = self.auth.register(email, password, name, account_type).await?;
        let tokens = TokenPair::new(data.access_token, data.refresh_token);
        if !tokens.is_complete() {
            return Err(AuthError::RegistrationFailed(
                "registration response is missing a token".to_string(),
            ));
        }

        self.persist_tokens(&tokens).await;
        self.establish(tokens.clone(), None);

        tracing::info!(?account_type, "Registered account; profile setup pending");
        Ok(tokens)
    }

    /// Attach the user profile after registration
    pub fn complete_profile_setup(&self, user: User) -> Result<()> {
        {
            let mut session = self.session.write();
            let session = session.as_mut().ok_or(AuthError::NoSession)?;
            session.current_user = Some(user.clone());
        }

        tracing::info!(user_id = %user.id, "Profile setup complete");
        self.emit(SessionEvent::Create, Some(&user));
        Ok(())
    }

    /// Restore the session persisted by a previous launch
    ///
    /// Reads the token record and exchanges its refresh token. Returns
    /// whether the client ended up authenticated. A missing record is not an
    /// error; a malformed or rejected one is deleted.
    pub async fn initialize_from_storage(&self) -> bool {
        let raw = match self.storage.get(TOKENS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("No persisted session");
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to read persisted session: {}", e);
                return false;
            }
        };

        let stored = match PersistedTokenRecord::decode(&raw) {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Discarding persisted session: {}", e);
                self.delete_persisted().await;
                return false;
            }
        };

        let data = match self
            .auth
            .refresh(&stored.access_token, &stored.refresh_token)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::info!("Persisted session could not be restored: {}", e);
                *self.session.write() = None;
                self.delete_persisted().await;
                return false;
            }
        };

        let tokens = data.token_pair();
        let user = match data.user {
            Some(user) if tokens.is_complete() => user,
            _ => {
                tracing::warn!("Refresh response was incomplete; discarding session");
                *self.session.write() = None;
                self.delete_persisted().await;
                return false;
            }
        };

        self.persist_tokens(&tokens).await;
        self.establish(tokens, Some(user.clone()));

        tracing::info!(user_id = %user.id, "Session restored");
        self.emit(SessionEvent::Create, Some(&user));
        true
    }

    /// Sign out and remove the persisted record
    ///
    /// Idempotent: logging out without a session leaves state untouched.
    pub async fn logout(&self) {
        let had_session = self.session.write().take().is_some();
        self.delete_persisted().await;

        if had_session {
            tracing::info!("Logged out");
            self.emit(SessionEvent::Cleared, None);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Whether a user is signed in
    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.current_user.is_some())
    }

    /// The signed-in user
    pub fn current_user(&self) -> Option<User> {
        self.session.read().as_ref().and_then(|s| s.current_user.clone())
    }

    /// The current access token
    pub fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.tokens.access_token.clone())
            .filter(|token| !token.is_empty())
    }

    /// Snapshot of the whole session
    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    /// Whether a refresh exchange is in flight
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_refreshing()
    }

    /// Callers parked behind the in-flight refresh
    pub fn pending_refresh_waiters(&self) -> usize {
        self.refresh.pending()
    }

    /// The client used for protected requests
    pub fn client(&self) -> &RestClient {
        &self.client
    }

    // =========================================================================
    // Protected requests
    // =========================================================================

    /// Attach the current access token as the bearer credential
    ///
    /// Requests pass through unchanged when there is no token.
    pub fn authorize(&self, request: &mut RestRequest) {
        if let Some(token) = self.access_token() {
            request.set_bearer(&token);
        }
    }

    /// Send a protected request, refreshing and replaying once on `401`
    pub async fn send<T>(&self, mut request: RestRequest) -> Result<RestResponse<T>>
    where
        T: DeserializeOwned,
    {
        self.authorize(&mut request);

        match self.client.execute::<T>(&request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_unauthorized() && !request.retried => {
                self.handle_unauthorized(request, e).await
            }
            Err(e) => Err(AuthError::Request(e)),
        }
    }

    /// Recover a request that failed with `401`
    ///
    /// Obtains a fresh access token (joining an in-flight refresh if there is
    /// one) and replays `failed` exactly once. If the refresh fails, the
    /// session is dropped and the caller gets the original `error` back.
    pub async fn handle_unauthorized<T>(
        &self,
        mut failed: RestRequest,
        error: RestError,
    ) -> Result<RestResponse<T>>
    where
        T: DeserializeOwned,
    {
        if failed.retried || !error.is_unauthorized() {
            return Err(AuthError::Request(error));
        }

        let token = match self.fresh_access_token(failed.bearer_token()).await {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("Cannot replay {}: {}", failed.path, e);
                return Err(AuthError::Request(error));
            }
        };

        failed.retried = true;
        failed.set_bearer(&token);
        self.client
            .execute::<T>(&failed)
            .await
            .map_err(AuthError::Request)
    }

    /// Token to replay with, refreshing if the one that failed is current
    async fn fresh_access_token(&self, failed_with: Option<&str>) -> RefreshOutcome {
        match self.access_token() {
            // A refresh finished after this request went out.
            Some(current) if failed_with != Some(current.as_str()) => return Ok(current),
            Some(_) => {}
            None if !self.refresh.is_refreshing() => return Err(AuthError::NoSession),
            None => {}
        }

        match self.refresh.enter() {
            Ticket::Waiter(rx) => rx.await.unwrap_or_else(|_| Err(abandoned())),
            Ticket::Leader(guard) => {
                let generation = self.session.read().as_ref().map(|s| s.generation);
                let (outcome, expired) = match generation {
                    Some(generation) => {
                        let outcome = self.exchange_refresh_token(generation).await;
                        // Only the session the exchange ran for may be dropped.
                        let expired = outcome.is_err() && self.expire(generation);
                        (outcome, expired)
                    }
                    None => (Err(AuthError::NoSession), false),
                };

                let waiters = guard.settle(&outcome);
                if waiters > 0 {
                    tracing::debug!("Released {} requests waiting on refresh", waiters);
                }

                if expired {
                    self.delete_persisted().await;
                    // A login may have landed while the record was being deleted.
                    let newer = self.session.read().as_ref().map(|s| s.tokens.clone());
                    if let Some(tokens) = newer {
                        self.persist_tokens(&tokens).await;
                    }
                }
                outcome
            }
        }
    }

    /// Exchange the refresh token of session `generation` and install the
    /// rotated pair
    ///
    /// The result is discarded if that session ended or was replaced while
    /// the exchange was in flight.
    async fn exchange_refresh_token(&self, generation: u64) -> RefreshOutcome {
        let current = self
            .session
            .read()
            .as_ref()
            .filter(|s| s.generation == generation)
            .map(|s| s.tokens.clone());
        let Some(current) = current else {
            return Err(superseded());
        };

        tracing::debug!("Refreshing access token");
        let data = match self
            .auth
            .refresh(&current.access_token, &current.refresh_token)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                return Err(e);
            }
        };

        let tokens = data.token_pair();
        if !tokens.is_complete() {
            tracing::warn!("Token refresh returned an incomplete pair");
            return Err(AuthError::RefreshFailed(
                "refresh response is missing a token".to_string(),
            ));
        }

        let user = {
            let mut session = self.session.write();
            let Some(session) = session.as_mut().filter(|s| s.generation == generation) else {
                tracing::info!("Session changed during refresh; discarding rotated tokens");
                return Err(superseded());
            };
            session.tokens = tokens.clone();
            if let Some(user) = data.user {
                session.current_user = Some(user);
            }
            session.current_user.clone()
        };

        self.persist_tokens(&tokens).await;

        // The session may have ended or been replaced while the record was
        // being written; the record must follow whatever is current now.
        let now = self
            .session
            .read()
            .as_ref()
            .map(|s| (s.generation, s.tokens.clone()));
        match now {
            Some((current, _)) if current == generation => {}
            Some((_, newer)) => self.persist_tokens(&newer).await,
            None => self.delete_persisted().await,
        }

        tracing::info!("Access token refreshed");
        self.emit(SessionEvent::Update, user.as_ref());
        Ok(tokens.access_token)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn establish(&self, tokens: TokenPair, user: Option<User>) -> u64 {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        *self.session.write() = Some(Session {
            tokens,
            current_user: user,
            generation,
        });
        generation
    }

    /// Drop the session if it is still `generation`; returns whether it was
    fn expire(&self, generation: u64) -> bool {
        let dropped = {
            let mut session = self.session.write();
            if session.as_ref().is_some_and(|s| s.generation == generation) {
                session.take().is_some()
            } else {
                false
            }
        };

        if dropped {
            tracing::info!("Session expired");
            self.emit(SessionEvent::Expired, None);
        }
        dropped
    }

    async fn persist_tokens(&self, tokens: &TokenPair) {
        let record = match PersistedTokenRecord::encode(tokens) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Failed to encode session tokens: {}", e);
                return;
            }
        };

        if let Err(e) = self.storage.set(TOKENS_KEY, &record).await {
            tracing::warn!("Failed to persist session tokens: {}", e);
        }
    }

    async fn delete_persisted(&self) {
        if let Err(e) = self.storage.delete(TOKENS_KEY).await {
            tracing::warn!("Failed to delete persisted session: {}", e);
        }
    }

    // =========================================================================
    // Event Callbacks
    // =========================================================================

    /// Register a callback for session events
    ///
    /// Keep the returned id to unregister with
    /// [`SessionManager::remove_session_callback`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use api_client::{RestClientConfig, SessionEvent, SessionManager};
    /// # use std::sync::Arc;
    /// # use storage::MemoryStore;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = SessionManager::new(RestClientConfig::default(), Arc::new(MemoryStore::new()))?;
    /// manager.on_session_event(|event, user| {
    ///     if event == SessionEvent::Expired {
    ///         println!("Session expired");
    ///     } else if let Some(user) = user {
    ///         println!("{:?} for {}", event, user.name);
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn on_session_event<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(SessionEvent, Option<&User>) + Send + Sync + 'static,
    {
        let id = CallbackId(self.callback_ids.fetch_add(1, Ordering::Relaxed));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Unregister a callback; returns whether it was registered
    pub fn remove_session_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(registered, _)| *registered != id);
        callbacks.len() != before
    }

    /// Number of registered callbacks
    pub fn session_callback_count(&self) -> usize {
        self.callbacks.read().len()
    }

    fn emit(&self, event: SessionEvent, user: Option<&User>) {
        let callbacks: Vec<SessionCallback> =
            self.callbacks.read().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(event, user);
        }
    }
}

/// Error for a refresh whose session is no longer current
fn superseded() -> AuthError {
    AuthError::RefreshFailed("session changed during refresh".to_string())
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.client.base_url())
            .field("authenticated", &self.is_authenticated())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::Envelope;
    use async_trait::async_trait;
    use crate::test_utils::{
        demo_user, manager_for, refreshed_body, token_body, unauthorized_body,
    };
    use mockall::mock;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::{KvError, MemoryStore};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    mock! {
        pub Store {}

        #[async_trait]
        impl KeyValueStore for Store {
            async fn get(&self, key: &str) -> storage::Result<Option<String>>;
            async fn set(&self, key: &str, value: &str) -> storage::Result<()>;
            async fn delete(&self, key: &str) -> storage::Result<()>;
        }
    }

    async fn mount_login(server: &MockServer, access: &str, refresh: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, refresh)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_persists_and_authenticates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .and(body_json(json!({"email": "demo@example.com", "password": "secret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("a1", "r1")))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());

        let user = manager.login("demo@example.com", "secret").await.unwrap();

        assert_eq!(user, demo_user());
        assert!(manager.is_authenticated());
        assert_eq!(manager.access_token().as_deref(), Some("a1"));
        assert_eq!(
            PersistedTokenRecord::decode(&store.peek(TOKENS_KEY).unwrap()).unwrap(),
            TokenPair::new("a1", "r1")
        );
    }

    #[tokio::test]
    async fn test_login_rejected_leaves_state_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"success": false, "message": "Invalid password"})),
            )
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());

        let result = manager.login("demo@example.com", "wrong").await;

        match result {
            Err(AuthError::InvalidCredentials(message)) => assert_eq!(message, "Invalid password"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!manager.is_authenticated());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_login_unsuccessful_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "message": "Account locked"})),
            )
            .mount(&server)
            .await;

        let manager = manager_for(&server, MemoryStore::new());

        let result = manager.login("demo@example.com", "secret").await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_login_unreachable_backend() {
        // Nothing listens on port 9 on the loopback interface.
        let config = RestClientConfig::new("http://127.0.0.1:9");
        let manager = SessionManager::new(config, Arc::new(MemoryStore::new())).unwrap();

        let result = manager.login("demo@example.com", "secret").await;
        assert!(matches!(result, Err(AuthError::NetworkUnavailable(_))));
    }

    #[tokio::test]
    async fn test_login_survives_storage_failure() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;

        let mut store = MockStore::new();
        store
            .expect_set()
            .times(1)
            .returning(|_, _| Err(KvError::InvalidKey("disk full".to_string())));

        let manager = SessionManager::with_client(
            RestClient::new(RestClientConfig::new(server.uri())).unwrap(),
            Arc::new(store),
        );

        manager.login("demo@example.com", "secret").await.unwrap();
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_register_then_profile_setup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .and(body_json(json!({
                "email": "host@example.com",
                "password": "secret",
                "name": "Harbor Tours",
                "accountType": "host"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true,
                "data": {"accessToken": "a1", "refreshToken": "r1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());

        let tokens = manager
            .register("host@example.com", "secret", "Harbor Tours", AccountType::Host)
            .await
            .unwrap();

        assert_eq!(tokens, TokenPair::new("a1", "r1"));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.access_token().as_deref(), Some("a1"));
        assert!(store.peek(TOKENS_KEY).is_some());

        manager.complete_profile_setup(demo_user()).unwrap();
        assert!(manager.is_authenticated());
        assert_eq!(manager.current_user(), Some(demo_user()));
    }

    #[tokio::test]
    async fn test_register_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"success": false, "message": "Email already in use"})),
            )
            .mount(&server)
            .await;

        let manager = manager_for(&server, MemoryStore::new());

        let result = manager
            .register("demo@example.com", "secret", "Demo", AccountType::User)
            .await;
        assert!(matches!(result, Err(AuthError::RegistrationFailed(_))));
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_profile_setup_requires_tokens() {
        let manager = SessionManager::new(
            RestClientConfig::default(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        let result = manager.complete_profile_setup(demo_user());
        assert!(matches!(result, Err(AuthError::NoSession)));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_initialize_without_record() {
        let server = MockServer::start().await;
        let manager = manager_for(&server, MemoryStore::new());

        assert!(!manager.initialize_from_storage().await);
        assert!(!manager.is_authenticated());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_restores_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(header("Authorization", "Bearer a1"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body("a2", "r2")))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::with_entries([(
            TOKENS_KEY,
            r#"{"accessToken":"a1","refreshToken":"r1"}"#,
        )]);
        let manager = manager_for(&server, store.clone());

        assert!(manager.initialize_from_storage().await);
        assert_eq!(manager.current_user(), Some(demo_user()));
        assert_eq!(manager.access_token().as_deref(), Some("a2"));
        assert_eq!(
            PersistedTokenRecord::decode(&store.peek(TOKENS_KEY).unwrap()).unwrap(),
            TokenPair::new("a2", "r2")
        );
    }

    #[tokio::test]
    async fn test_initialize_discards_malformed_record() {
        let server = MockServer::start().await;
        let store = MemoryStore::with_entries([(TOKENS_KEY, r#"{"accessToken":"a1"}"#)]);
        let manager = manager_for(&server, store.clone());

        assert!(!manager.initialize_from_storage().await);
        assert!(store.peek(TOKENS_KEY).is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_rejected_refresh_deletes_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(unauthorized_body()))
            .mount(&server)
            .await;

        let store = MemoryStore::with_entries([(
            TOKENS_KEY,
            r#"{"accessToken":"a1","refreshToken":"r1"}"#,
        )]);
        let manager = manager_for(&server, store.clone());

        assert!(!manager.initialize_from_storage().await);
        assert!(!manager.is_authenticated());
        assert!(store.peek(TOKENS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_initialize_requires_user_in_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"accessToken": "a2", "refreshToken": "r2"}
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::with_entries([(
            TOKENS_KEY,
            r#"{"accessToken":"a1","refreshToken":"r1"}"#,
        )]);
        let manager = manager_for(&server, store.clone());

        assert!(!manager.initialize_from_storage().await);
        assert!(store.peek(TOKENS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());
        let cleared = Arc::new(AtomicUsize::new(0));
        let counter = cleared.clone();
        manager.on_session_event(move |event, _| {
            if event == SessionEvent::Cleared {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.login("demo@example.com", "secret").await.unwrap();
        manager.logout().await;
        manager.logout().await;

        assert!(!manager.is_authenticated());
        assert!(manager.session().is_none());
        assert!(store.is_empty());
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logout_survives_storage_failure() {
        let mut store = MockStore::new();
        store
            .expect_delete()
            .returning(|_| Err(KvError::InvalidKey("locked".to_string())));

        let manager =
            SessionManager::new(RestClientConfig::default(), Arc::new(store)).unwrap();

        manager.logout().await;
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn test_authorize_without_token() {
        let manager = SessionManager::new(
            RestClientConfig::default(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        let mut request = RestRequest::get("/tour");
        manager.authorize(&mut request);
        assert!(request.bearer_token().is_none());
    }

    #[tokio::test]
    async fn test_send_attaches_bearer() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;
        Mock::given(method("GET"))
            .and(path("/location"))
            .and(header("Authorization", "Bearer a1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server, MemoryStore::new());
        manager.login("demo@example.com", "secret").await.unwrap();

        let response = manager
            .send::<Envelope<Vec<Value>>>(RestRequest::get("/location"))
            .await
            .unwrap();
        assert_eq!(response.data.into_data().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_send_refreshes_and_replays() {
        let server = MockServer::start().await;
        mount_login(&server, "stale", "r1").await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body("fresh", "r2")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tour"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": [1]})),
            )
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tour"))
            .respond_with(ResponseTemplate::new(401).set_body_json(unauthorized_body()))
            .with_priority(10)
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());
        let updates = Arc::new(AtomicUsize::new(0));
        let counter = updates.clone();
        manager.on_session_event(move |event, _| {
            if event == SessionEvent::Update {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        manager.login("demo@example.com", "secret").await.unwrap();

        let response = manager
            .send::<Envelope<Vec<u32>>>(RestRequest::get("/tour"))
            .await
            .unwrap();

        assert_eq!(response.data.into_data().unwrap(), vec![1]);
        assert_eq!(manager.access_token().as_deref(), Some("fresh"));
        assert!(!manager.is_refreshing());
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(
            PersistedTokenRecord::decode(&store.peek(TOKENS_KEY).unwrap()).unwrap(),
            TokenPair::new("fresh", "r2")
        );
        server.verify().await;
    }

    #[tokio::test]
    async fn test_send_without_refresh_token_returns_original_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tour"))
            .respond_with(ResponseTemplate::new(401).set_body_json(unauthorized_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body("a", "r")))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(&server, MemoryStore::new());

        let result = manager.send::<Value>(RestRequest::get("/tour")).await;

        let error = result.unwrap_err();
        assert_eq!(error.rest_error().map(|e| e.status()), Some(401));
        server.verify().await;
    }

    #[tokio::test]
    async fn test_non_auth_failure_passes_through() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;
        Mock::given(method("GET"))
            .and(path("/activity"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({"success": false, "message": "boom"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(refreshed_body("a", "r")))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager_for(&server, MemoryStore::new());
        manager.login("demo@example.com", "secret").await.unwrap();

        let error = manager
            .send::<Value>(RestRequest::get("/activity"))
            .await
            .unwrap_err();

        assert_eq!(error.rest_error().map(|e| e.status()), Some(500));
        assert!(manager.is_authenticated());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_already_retried_request_fails_hard() {
        let server = MockServer::start().await;
        let manager = manager_for(&server, MemoryStore::new());

        let mut request = RestRequest::get("/tour");
        request.retried = true;
        let error = RestError::new(401, "Unauthorized", "still expired");

        let result = manager.handle_unauthorized::<Value>(request, error).await;

        assert_eq!(
            result.unwrap_err().rest_error().map(|e| e.message().to_string()),
            Some("still expired".to_string())
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_logs_out() {
        let server = MockServer::start().await;
        mount_login(&server, "stale", "r1").await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh-token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(unauthorized_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user/all"))
            .respond_with(ResponseTemplate::new(401).set_body_json(unauthorized_body()))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());
        let expired = Arc::new(AtomicUsize::new(0));
        let counter = expired.clone();
        manager.on_session_event(move |event, user| {
            if event == SessionEvent::Expired {
                assert!(user.is_none());
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        manager.login("demo@example.com", "secret").await.unwrap();

        let error = manager
            .send::<Value>(RestRequest::get("/user/all"))
            .await
            .unwrap_err();

        assert_eq!(error.rest_error().map(|e| e.status()), Some(401));
        assert!(!manager.is_authenticated());
        assert!(manager.access_token().is_none());
        assert!(store.peek(TOKENS_KEY).is_none());
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_login_rejects_incomplete_tokens() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "").await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());

        let result = manager.login("demo@example.com", "secret").await;

        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
        assert!(manager.session().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_incomplete_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true,
                "data": {"accessToken": "", "refreshToken": "r1"}
            })))
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let manager = manager_for(&server, store.clone());

        let result = manager
            .register("host@example.com", "secret", "Harbor Tours", AccountType::Host)
            .await;

        assert!(matches!(result, Err(AuthError::RegistrationFailed(_))));
        assert!(manager.session().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_each_login_starts_a_new_generation() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;
        let manager = manager_for(&server, MemoryStore::new());

        manager.login("demo@example.com", "secret").await.unwrap();
        let first = manager.session().unwrap().generation;
        manager.logout().await;
        manager.login("demo@example.com", "secret").await.unwrap();

        assert!(manager.session().unwrap().generation > first);
    }

    #[tokio::test]
    async fn test_removed_callback_stops_firing() {
        let server = MockServer::start().await;
        mount_login(&server, "a1", "r1").await;
        let manager = manager_for(&server, MemoryStore::new());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = manager.on_session_event(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(manager.session_callback_count(), 1);

        assert!(manager.remove_session_callback(id));
        assert!(!manager.remove_session_callback(id));
        manager.login("demo@example.com", "secret").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.session_callback_count(), 0);
    }
}
