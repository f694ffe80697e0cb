//! Authenticated HTTP client for the remote auth authority. Wraps every
//! outbound call: attaches the bearer credential, and on a 401 drives exactly
//! one refresh-and-retry cycle before giving up and forcing logout. Non-401
//! failures pass through unmodified; their retry policy belongs to the cache
//! layer or the caller, never to this client.

use std::sync::Arc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AuthError, AuthResult};
use crate::roles::dashboard_path;
use crate::session::state::{SharedSession, User, UserWire};
use crate::session::tokens::{SessionGrant, TokenStore};
use crate::session::user_bridge::DashboardSnapshot;
use crate::session::manager::TokenManager;
use crate::storage::SharedVault;

/// Response as seen by callers: status plus parsed JSON body. Non-success
/// statuses other than 401 are delivered here untouched.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    /// Map to a result: success yields the body, anything else becomes an
    /// `Http` error carrying the original status.
    pub fn into_result(self) -> AuthResult<serde_json::Value> {
        if self.is_success() {
            Ok(self.body)
        } else {
            let msg = self.body["message"].as_str().unwrap_or("request failed").to_string();
            Err(AuthError::http(self.status, msg))
        }
    }
}

/// Outcome of a successful login/register: the resolved user and the landing
/// target the routing layer should navigate to for that user's role.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub redirect_to: String,
}

struct ClientInner {
    http: reqwest::Client,
    base: String,
    tokens: TokenManager,
    session: SharedSession,
    vault: SharedVault,
}

#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<ClientInner>,
}

impl AuthClient {
    pub fn new(cfg: &EngineConfig, vault: SharedVault, session: SharedSession) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let store = TokenStore::new(vault.clone());
        let tokens = TokenManager::new(store, session.clone(), http.clone(), &cfg.api_base);
        // A profile left behind by a legacy install prefills the view until a
        // fresh one arrives. It never marks the session authenticated.
        if let Some(value) = vault.take_legacy_user() {
            match serde_json::from_value::<UserWire>(value)
                .map_err(|e| AuthError::malformed("bad_legacy_profile", e.to_string()))
                .and_then(User::from_wire)
            {
                Ok(user) => session.set_user(user),
                Err(e) => debug!(target: "brandsight::client", "legacy profile discarded: {}", e),
            }
        }
        Ok(AuthClient {
            inner: Arc::new(ClientInner {
                http,
                base: cfg.api_base.trim_end_matches('/').to_string(),
                tokens,
                session,
                vault,
            }),
        })
    }

    pub fn tokens(&self) -> &TokenManager { &self.inner.tokens }

    pub fn session(&self) -> &SharedSession { &self.inner.session }

    fn url(&self, path: &str) -> String { format!("{}{}", self.inner.base, path) }

    /// The interceptor. One logical call issues at most two network attempts:
    /// the original, and one retry after a single refresh.
    pub async fn fetch_with_auth(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> AuthResult<ApiResponse> {
        let token = self.inner.tokens.get_valid_token().await?;
        let first = self.issue(method.clone(), path, body.as_ref(), &token).await?;
        if first.status != StatusCode::UNAUTHORIZED.as_u16() {
            return Ok(first);
        }
        debug!(target: "brandsight::client", "{} {} returned 401; refreshing once", method, path);
        let token = match self.inner.tokens.force_refresh().await {
            Ok(t) => t,
            Err(e) => {
                if e.forces_logout() {
                    self.forced_logout("refresh_rejected");
                }
                return Err(e);
            }
        };
        let second = self.issue(method, path, body.as_ref(), &token).await?;
        if second.status == StatusCode::UNAUTHORIZED.as_u16() {
            self.forced_logout("unauthorized_after_refresh");
            return Err(AuthError::authorization(
                "unauthorized",
                "request unauthorized even after refresh",
            ));
        }
        Ok(second)
    }

    async fn issue(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        token: &str,
    ) -> AuthResult<ApiResponse> {
        let mut req = self
            .inner
            .http
            .request(method, self.url(path))
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(ACCEPT, "application/json")
            .header("x-request-id", Uuid::new_v4().to_string());
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await.map_err(AuthError::from)?;
        let status = resp.status().as_u16();
        let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
        Ok(ApiResponse { status, body })
    }

    /// POST /auth/login. Populates the token store and session state, and
    /// reports the role-appropriate landing target.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<LoginOutcome> {
        self.inner.session.set_loading(true);
        let out = self
            .credential_grant("/auth/login", serde_json::json!({
                "email": email,
                "password": password,
            }))
            .await;
        if out.is_err() {
            self.inner.session.set_loading(false);
        }
        out
    }

    /// POST /auth/register. Same grant handling as login.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        company: Option<&str>,
    ) -> AuthResult<LoginOutcome> {
        self.inner.session.set_loading(true);
        let mut payload = serde_json::json!({ "email": email, "password": password });
        if let Some(company) = company {
            payload["company"] = serde_json::Value::String(company.to_string());
        }
        let out = self.credential_grant("/auth/register", payload).await;
        if out.is_err() {
            self.inner.session.set_loading(false);
        }
        out
    }

    async fn credential_grant(
        &self,
        path: &str,
        payload: serde_json::Value,
    ) -> AuthResult<LoginOutcome> {
        let resp = self
            .inner
            .http
            .post(self.url(path))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(AuthError::from)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::authorization(
                "invalid_credentials",
                "credentials rejected",
            ));
        }
        if !status.is_success() {
            return Err(AuthError::http(status.as_u16(), format!("{} failed with {}", path, status)));
        }
        let grant: SessionGrant = resp
            .json()
            .await
            .map_err(|e| AuthError::network("bad_grant_body", e.to_string()))?;
        let user_wire = grant.user.clone().ok_or_else(|| {
            AuthError::malformed("missing_user", "grant carried no user payload")
        })?;
        let user = User::from_wire(user_wire)?;
        let pair = grant.into_pair(None).ok_or_else(|| {
            AuthError::malformed("missing_tokens", "grant carried no usable token pair")
        })?;
        self.inner
            .tokens
            .store()
            .save(&pair)
            .map_err(|e| AuthError::internal("vault_write", e.to_string()))?;
        self.inner.session.login_succeeded(user.clone());
        info!(target: "brandsight::client", "authenticated user={} role={}", user.id, user.role.as_str());
        Ok(LoginOutcome { redirect_to: dashboard_path(user.role).to_string(), user })
    }

    /// GET /auth/me. Refreshes the in-memory profile.
    pub async fn me(&self) -> AuthResult<User> {
        let body = self
            .fetch_with_auth(Method::GET, "/auth/me", None)
            .await?
            .into_result()?;
        let wire = serde_json::from_value(body)
            .map_err(|e| AuthError::malformed("bad_me_body", e.to_string()))?;
        let user = User::from_wire(wire)?;
        self.inner.session.set_user(user.clone());
        Ok(user)
    }

    /// GET /auth/dashboard. Single aggregate call returning user, subscription,
    /// team and stats; consumed by the user-store bridge.
    pub async fn dashboard(&self) -> AuthResult<DashboardSnapshot> {
        let body = self
            .fetch_with_auth(Method::GET, "/auth/dashboard", None)
            .await?
            .into_result()?;
        serde_json::from_value(body)
            .map_err(|e| AuthError::malformed("bad_dashboard_body", e.to_string()))
    }

    /// User-initiated logout: clear tokens and state, redirect to login.
    pub fn logout(&self) {
        self.inner.tokens.store().clear();
        self.inner.session.logout();
        info!(target: "brandsight::client", "logged out");
    }

    /// Recovery action one: drop the session but keep local data, then send
    /// the user back to login.
    pub fn reauthenticate(&self) {
        self.inner.session.dismiss_expiry_notice();
        self.inner.tokens.store().clear();
        self.inner.session.logout();
    }

    /// Recovery action two: additionally wipe everything persisted locally
    /// (tokens and the offline query cache) before re-authentication.
    pub fn clear_all_and_reauthenticate(&self) {
        self.inner.tokens.store().clear();
        if let Err(e) = self.inner.vault.purge_all() {
            warn!(target: "brandsight::client", "vault purge failed: {}", e);
        }
        self.inner.session.logout();
    }

    fn forced_logout(&self, reason: &str) {
        self.inner.tokens.store().clear();
        self.inner.session.force_logout(reason);
    }
}
