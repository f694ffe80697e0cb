//! Token manager: the single accessor for a currently-valid bearer token and
//! the owner of the single-flight refresh protocol. At most one refresh is in
//! flight at any time; every concurrent caller joins it and observes the same
//! outcome, so interleaved writes can never corrupt the token store.

use std::sync::Arc;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};
use crate::session::state::SharedSession;
use crate::session::tokens::{SessionGrant, TokenStore};

type RefreshShared = Shared<BoxFuture<'static, AuthResult<String>>>;

struct ManagerInner {
    store: TokenStore,
    session: SharedSession,
    http: reqwest::Client,
    refresh_url: String,
    in_flight: Mutex<Option<RefreshShared>>,
}

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<ManagerInner>,
}

impl TokenManager {
    pub fn new(
        store: TokenStore,
        session: SharedSession,
        http: reqwest::Client,
        api_base: &str,
    ) -> Self {
        let refresh_url = format!("{}/auth/refresh", api_base.trim_end_matches('/'));
        TokenManager {
            inner: Arc::new(ManagerInner {
                store,
                session,
                http,
                refresh_url,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore { &self.inner.store }

    /// A currently-valid access token. Returns without I/O when the stored
    /// token is unexpired; otherwise joins (or starts) the shared refresh.
    pub async fn get_valid_token(&self) -> AuthResult<String> {
        if let Some(token) = self.inner.store.current_access_token() {
            return Ok(token);
        }
        self.refresh_joined().await
    }

    /// Unconditional refresh, used by the interceptor after a 401. Still
    /// single-flight: a refresh already in progress is joined, not duplicated.
    pub async fn force_refresh(&self) -> AuthResult<String> {
        self.refresh_joined().await
    }

    async fn refresh_joined(&self) -> AuthResult<String> {
        let fut = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    debug!(target: "brandsight::session", "joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    let this = self.clone();
                    let fut: RefreshShared =
                        async move { this.perform_refresh().await }.boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };
        let outcome = fut.clone().await;
        // Retire the slot so the next expiry starts a fresh cycle. Only the
        // future we actually awaited is retired; a refresh started in between
        // by someone else stays.
        let mut slot = self.inner.in_flight.lock();
        if slot.as_ref().map(|f| f.ptr_eq(&fut)).unwrap_or(false) {
            *slot = None;
        }
        outcome
    }

    async fn perform_refresh(&self) -> AuthResult<String> {
        let Some(refresh_token) = self.inner.store.refresh_token() else {
            self.reject_session("no_refresh_token");
            return Err(AuthError::authorization(
                "no_refresh_token",
                "no refresh token present",
            ));
        };
        debug!(target: "brandsight::session", "refreshing access token");
        let resp = self
            .inner
            .http
            .post(&self.inner.refresh_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(AuthError::from)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::BAD_REQUEST
        {
            // The refresh token itself was rejected; the session is over.
            self.reject_session("refresh_rejected");
            return Err(AuthError::authorization(
                "refresh_rejected",
                format!("refresh rejected with {}", status),
            ));
        }
        if !status.is_success() {
            // Server trouble, not a verdict on the token. Session survives and
            // a later call may refresh successfully.
            return Err(AuthError::http(
                status.as_u16(),
                format!("refresh failed with {}", status),
            ));
        }
        let grant: SessionGrant = resp
            .json()
            .await
            .map_err(|e| AuthError::network("bad_refresh_body", e.to_string()))?;
        let Some(pair) = grant.into_pair(Some(refresh_token)) else {
            self.reject_session("malformed_grant");
            return Err(AuthError::authorization(
                "malformed_grant",
                "refresh grant missing usable tokens",
            ));
        };
        self.inner
            .store
            .save(&pair)
            .map_err(|e| AuthError::internal("vault_write", e.to_string()))?;
        self.inner.session.touch_activity();
        info!(target: "brandsight::session", "token refreshed, expires_at={}", pair.expires_at);
        Ok(pair.access_token)
    }

    fn reject_session(&self, reason: &str) {
        warn!(target: "brandsight::session", "refresh failed fatally: {}", reason);
        self.inner.store.clear();
        self.inner.session.refresh_failed();
    }
}
