//! Session state of record. One owned state object behind a single
//! subscription point; every mutation funnels through the methods here, so
//! TokenStore writers and readers can never disagree about who owns what.

use std::collections::BTreeSet;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::{AuthError, AuthResult};
use crate::roles::{Permission, Role, RoleCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
}

impl UserStatus {
    pub fn parse(s: &str) -> UserStatus {
        match s {
            "suspended" => UserStatus::Suspended,
            "pending" => UserStatus::Pending,
            _ => UserStatus::Active,
        }
    }
}

/// Authenticated user, resolved once from the wire shape. Role category and
/// level are precomputed here and never re-derived by string inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub role_level: i32,
    pub category: RoleCategory,
    /// Explicit per-user permission overrides. When present they take
    /// precedence over the role table; `None` means "use the table".
    pub permission_overrides: Option<BTreeSet<Permission>>,
    pub status: UserStatus,
}

/// Raw user payload as the auth authority sends it.
#[derive(Debug, Clone, Deserialize)]
pub struct UserWire {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
}

impl User {
    pub fn from_wire(wire: UserWire) -> AuthResult<User> {
        let Some(role) = Role::parse(&wire.role) else {
            // Fail-closed: a role outside the closed set never becomes a user.
            return Err(AuthError::malformed(
                "unknown_role",
                format!("unrecognized role '{}'", wire.role),
            ));
        };
        let permission_overrides = wire.permissions.map(|list| {
            list.iter()
                .filter_map(|s| {
                    let parsed = serde_json::from_value::<Permission>(
                        serde_json::Value::String(s.clone()),
                    );
                    if parsed.is_err() {
                        warn!(target: "brandsight::session",
                            "ignoring unrecognized permission override '{}'", s);
                    }
                    parsed.ok()
                })
                .collect::<BTreeSet<_>>()
        });
        let status = wire.status.as_deref().map(UserStatus::parse).unwrap_or(UserStatus::Active);
        Ok(User {
            id: wire.id,
            email: wire.email,
            role,
            role_level: role.level(),
            category: role.category(),
            permission_overrides,
            status,
        })
    }
}

/// Surfaced on session expiry or forced logout so the notification layer can
/// show an explicit, dismissible screen instead of a silent redirect. The two
/// recovery actions live on `AuthClient`: `reauthenticate` and
/// `clear_all_and_reauthenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryNotice {
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub last_activity: DateTime<Utc>,
    pub expiry_notice: Option<ExpiryNotice>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: false,
            last_activity: Utc::now(),
            expiry_notice: None,
        }
    }
}

/// The single subscription point for session state, plus a redirect signal
/// channel the routing layer listens on.
pub struct SessionCell {
    tx: watch::Sender<SessionState>,
    redirects: broadcast::Sender<Redirect>,
}

pub type SharedSession = Arc<SessionCell>;

impl SessionCell {
    pub fn new() -> SharedSession {
        let (tx, _rx) = watch::channel(SessionState::default());
        let (redirects, _) = broadcast::channel(16);
        Arc::new(SessionCell { tx, redirects })
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.tx.subscribe() }

    pub fn redirects(&self) -> broadcast::Receiver<Redirect> { self.redirects.subscribe() }

    pub fn snapshot(&self) -> SessionState { self.tx.borrow().clone() }

    pub fn set_loading(&self, loading: bool) {
        self.tx.send_modify(|s| s.is_loading = loading);
    }

    pub fn login_succeeded(&self, user: User) {
        debug!(target: "brandsight::session", "login user={} role={}", user.id, user.role.as_str());
        self.tx.send_modify(|s| {
            s.user = Some(user);
            s.is_authenticated = true;
            s.is_loading = false;
            s.last_activity = Utc::now();
            s.expiry_notice = None;
        });
    }

    /// Replace the profile without touching authentication flags; used when a
    /// fresher profile arrives from `/auth/me` or the dashboard aggregate.
    pub fn set_user(&self, user: User) {
        self.tx.send_modify(|s| s.user = Some(user));
    }

    pub fn touch_activity(&self) {
        self.tx.send_modify(|s| s.last_activity = Utc::now());
    }

    /// Refresh rejected: the session is over, but no redirect fires here. The
    /// interceptor owns the forced-logout side effect for its own callers.
    pub fn refresh_failed(&self) {
        self.tx.send_modify(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.is_loading = false;
        });
    }

    /// User-initiated logout. Clears state and redirects to the login path.
    pub fn logout(&self) {
        self.tx.send_modify(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.is_loading = false;
            s.expiry_notice = None;
        });
        self.redirect_to_login();
    }

    /// Forced logout (failed retry-after-refresh, session expiry). Clears
    /// state, records an expiry notice naming the condition and redirects to
    /// the login path exactly once per call.
    pub fn force_logout(&self, reason: &str) {
        let mut fired = false;
        self.tx.send_modify(|s| {
            // Concurrent failing calls all funnel here; only the first one
            // records the notice and redirects.
            if !s.is_authenticated && s.expiry_notice.is_some() {
                return;
            }
            s.user = None;
            s.is_authenticated = false;
            s.is_loading = false;
            s.expiry_notice = Some(ExpiryNotice {
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            });
            fired = true;
        });
        if fired {
            warn!(target: "brandsight::session", "forced logout: {}", reason);
            self.redirect_to_login();
        }
    }

    pub fn dismiss_expiry_notice(&self) {
        self.tx.send_modify(|s| s.expiry_notice = None);
    }

    fn redirect_to_login(&self) {
        // No receivers is fine; the routing layer may not be attached in tests.
        let _ = self.redirects.send(Redirect { path: crate::roles::login_path().to_string() });
    }
}
