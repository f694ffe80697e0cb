//! Exactly-once aggregate profile load per authenticated session. A sticky
//! guard independent of caller churn: however many times the trigger fires
//! while a load is pending or already done, only one dashboard call happens.
//! Logout resets the guard so the next login loads exactly once again.

use std::sync::Arc;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::AuthClient;
use crate::session::state::{SharedSession, User, UserWire};

/// Aggregate returned by `/auth/dashboard`: the profile plus the subscription,
/// team and stats blocks the rest of the app renders from.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardSnapshot {
    pub user: Option<UserWire>,
    #[serde(default)]
    pub subscription: serde_json::Value,
    #[serde(default)]
    pub team: serde_json::Value,
    #[serde(default)]
    pub stats: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    /// Observable error state; retry is explicit via `retry`, never silent.
    Failed { message: String },
}

struct BridgeInner {
    state: Mutex<LoadState>,
    data: Mutex<Option<DashboardSnapshot>>,
    session: SharedSession,
}

impl BridgeInner {
    fn reset(&self) {
        *self.state.lock() = LoadState::Idle;
        *self.data.lock() = None;
    }
}

#[derive(Clone)]
pub struct UserStoreBridge {
    inner: Arc<BridgeInner>,
}

impl UserStoreBridge {
    pub fn new(session: SharedSession) -> Self {
        let mut session_rx = session.subscribe();
        let inner = Arc::new(BridgeInner {
            state: Mutex::new(LoadState::Idle),
            data: Mutex::new(None),
            session,
        });
        // De-authentication (logout, forced logout, rejected refresh) re-arms
        // the guard automatically, so the next login loads the aggregate
        // exactly once again without callers wiring a reset.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut was_authenticated = session_rx.borrow().is_authenticated;
            while session_rx.changed().await.is_ok() {
                let now_authenticated = session_rx.borrow().is_authenticated;
                if was_authenticated && !now_authenticated {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.reset();
                    debug!(target: "brandsight::session", "session ended; user store re-armed");
                }
                was_authenticated = now_authenticated;
            }
        });
        UserStoreBridge { inner }
    }

    pub fn load_state(&self) -> LoadState { self.inner.state.lock().clone() }

    pub fn snapshot(&self) -> Option<DashboardSnapshot> { self.inner.data.lock().clone() }

    /// Trigger the aggregate load. No-op unless the guard is `Idle`; the guard
    /// flips to `Loading` before any await, so concurrent triggers and rapid
    /// re-triggers collapse to one call.
    pub async fn ensure_loaded(&self, client: &AuthClient) {
        {
            let mut state = self.inner.state.lock();
            if *state != LoadState::Idle {
                return;
            }
            *state = LoadState::Loading;
        }
        self.run_load(client).await;
    }

    /// Explicit retry from a failed load. No-op in any other state.
    pub async fn retry(&self, client: &AuthClient) {
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, LoadState::Failed { .. }) {
                return;
            }
            *state = LoadState::Loading;
        }
        self.run_load(client).await;
    }

    /// Clear all loaded data and re-arm the guard. De-authentication does
    /// this automatically; the explicit form exists for callers that need to
    /// force a reload inside a live session.
    pub fn reset(&self) {
        self.inner.reset();
        debug!(target: "brandsight::session", "user store reset");
    }

    async fn run_load(&self, client: &AuthClient) {
        match client.dashboard().await {
            Ok(snapshot) => {
                if let Some(wire) = snapshot.user.clone() {
                    match User::from_wire(wire) {
                        Ok(user) => self.inner.session.set_user(user),
                        Err(e) => warn!(target: "brandsight::session",
                            "dashboard user payload rejected: {}", e),
                    }
                }
                *self.inner.data.lock() = Some(snapshot);
                *self.inner.state.lock() = LoadState::Loaded;
                debug!(target: "brandsight::session", "dashboard aggregate loaded");
            }
            Err(e) => {
                // Stays local to this store; the rest of the tree is unaffected.
                warn!(target: "brandsight::session", "dashboard load failed: {}", e);
                *self.inner.state.lock() = LoadState::Failed { message: e.to_string() };
            }
        }
    }
}
