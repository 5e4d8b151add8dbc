//! Observable auth state
//!
//! [`AuthStore`] wraps the shared [`SessionManager`] and republishes its
//! state through a `tokio::sync::watch` channel, so screens can react to
//! login, logout, profile setup and forced logout after a failed refresh.

use api_client::{
    AccountType, AuthError, CallbackId, ResourceClient, SessionEvent, SessionManager, TokenPair,
    User,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// What the UI needs to know about authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    /// Whether a user is signed in
    pub is_authenticated: bool,
    /// Signed-in user
    pub current_user: Option<User>,
    /// Whether an auth action is in progress
    pub is_loading: bool,
}

impl AuthSnapshot {
    fn from_manager(manager: &SessionManager, is_loading: bool) -> Self {
        Self {
            is_authenticated: manager.is_authenticated(),
            current_user: manager.current_user(),
            is_loading,
        }
    }
}

/// Observable facade over the session manager
///
/// Cloning is cheap; clones share the manager and the published state.
#[derive(Debug, Clone)]
pub struct AuthStore {
    manager: Arc<SessionManager>,
    state: Arc<watch::Sender<AuthSnapshot>>,
    _observer: Arc<Observer>,
}

/// Session-event registration, removed when the last store clone goes away
#[derive(Debug)]
struct Observer {
    manager: Arc<SessionManager>,
    id: CallbackId,
}

impl Drop for Observer {
    fn drop(&mut self) {
        self.manager.remove_session_callback(self.id);
    }
}

impl AuthStore {
    /// Create a store observing `manager`
    ///
    /// The initial snapshot is loading until [`AuthStore::initialize`] runs.
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let (tx, _) = watch::channel(AuthSnapshot::from_manager(&manager, true));
        let state = Arc::new(tx);

        // Changes the manager makes on its own (refresh, forced logout)
        // must reach subscribers too.
        let weak = Arc::downgrade(&state);
        let id = manager.on_session_event(move |event, user| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            state.send_modify(|snapshot| match event {
                SessionEvent::Create | SessionEvent::Update => {
                    snapshot.is_authenticated = user.is_some();
                    snapshot.current_user = user.cloned();
                }
                SessionEvent::Expired | SessionEvent::Cleared => {
                    snapshot.is_authenticated = false;
                    snapshot.current_user = None;
                }
            });
        });

        let observer = Arc::new(Observer { manager: manager.clone(), id });
        Self { manager, state, _observer: observer }
    }

    /// Restore the persisted session, then stop loading
    pub async fn initialize(&self) -> AuthSnapshot {
        self.set_loading();
        let restored = self.manager.initialize_from_storage().await;
        tracing::debug!(restored, "Auth state initialized");
        self.publish()
    }

    /// Sign in
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AuthError> {
        self.set_loading();
        let result = self.manager.login(email, password).await;
        self.publish();
        result
    }

    /// Create an account; the user stays signed out until profile setup
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        account_type: AccountType,
    ) -> Result<TokenPair, AuthError> {
        self.set_loading();
        let result = self.manager.register(email, password, name, account_type).await;
        self.publish();
        result
    }

    /// Attach the profile created after registration
    pub fn complete_profile_setup(&self, user: User) -> Result<(), AuthError> {
        let result = self.manager.complete_profile_setup(user);
        self.publish();
        result
    }

    /// Sign out
    pub async fn logout(&self) {
        self.set_loading();
        self.manager.logout().await;
        self.publish();
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Whether a user is signed in
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    /// Signed-in user
    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().current_user.clone()
    }

    /// The underlying session manager
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Resource client sharing this store's session
    pub fn resources(&self) -> ResourceClient {
        ResourceClient::new(self.manager.clone())
    }

    fn set_loading(&self) {
        self.state.send_modify(|snapshot| snapshot.is_loading = true);
    }

    fn publish(&self) -> AuthSnapshot {
        let snapshot = AuthSnapshot::from_manager(&self.manager, false);
        self.state.send_replace(snapshot.clone());
        snapshot
    }
}
