//! Single-flight refresh coordination
//!
//! At most one refresh exchange runs at a time. The first caller to hit an
//! expired token becomes the leader and performs the exchange; everyone
//! arriving while it runs parks on a oneshot channel and receives the
//! leader's outcome in arrival order.

use super::AuthError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// New access token, or why the refresh failed
pub(crate) type RefreshOutcome = Result<String, AuthError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Role handed out by [`RefreshCoordinator::enter`]
pub(crate) enum Ticket<'a> {
    /// Caller must perform the exchange and settle the guard
    Leader(LeaderGuard<'a>),
    /// A refresh is in flight; await its outcome
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(RefreshState::Idle) }
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of callers parked behind the current refresh
    pub(crate) fn pending(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    pub(crate) fn enter(&self) -> Ticket<'_> {
        let mut state = self.state.lock();
        if let RefreshState::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push_back(tx);
            return Ticket::Waiter(rx);
        }

        *state = RefreshState::Refreshing { waiters: VecDeque::new() };
        Ticket::Leader(LeaderGuard { coordinator: self, settled: false })
    }

    /// Return to idle and hand back whoever was waiting
    fn drain(&self) -> VecDeque<oneshot::Sender<RefreshOutcome>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => VecDeque::new(),
        }
    }
}

/// Leader's handle on the in-flight refresh
///
/// Dropping it without calling [`LeaderGuard::settle`] (the leader's future
/// was cancelled) rejects all waiters so none of them hang.
pub(crate) struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    /// Go idle and deliver `outcome` to every waiter, oldest first
    pub(crate) fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        self.settled = true;
        let waiters = self.coordinator.drain();
        let count = waiters.len();
        for waiter in waiters {
            // Receiver gone means that caller was cancelled.
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.drain();
        if !waiters.is_empty() {
            tracing::warn!("Token refresh abandoned with {} waiters", waiters.len());
        }
        for waiter in waiters {
            let _ = waiter.send(Err(abandoned()));
        }
    }
}

/// Error for a refresh whose leader went away
pub(crate) fn abandoned() -> AuthError {
    AuthError::RefreshFailed("token refresh was abandoned".to_string())
}
