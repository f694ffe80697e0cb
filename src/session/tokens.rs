//! Token pair model and the vault-backed token store. The store is the only
//! component that writes token state to durable storage, and it does so only
//! on a successful grant or an explicit clear.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{SharedVault, KEY_AUTH_TOKENS};
use crate::session::state::UserWire;

/// Leeway subtracted from the access-token deadline so a token about to lapse
/// mid-flight is refreshed proactively rather than bounced by the server.
const EXPIRY_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_LEEWAY_SECS) >= self.expires_at
    }
}

/// Token grant as issued by `/auth/login`, `/auth/register` and
/// `/auth/refresh`. Refresh responses omit `user`; refresh rotation may omit
/// `refresh_token`, in which case the previous one stays valid.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserWire>,
}

impl SessionGrant {
    /// Build a pair from this grant, falling back to the previous refresh
    /// token when the authority did not rotate it.
    pub fn into_pair(self, previous_refresh: Option<String>) -> Option<TokenPair> {
        let refresh_token = self.refresh_token.or(previous_refresh)?;
        let issued_at = Utc::now();
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| issued_at + ChronoDuration::seconds(self.expires_in.unwrap_or(900)));
        if expires_at <= issued_at {
            return None;
        }
        Some(TokenPair { access_token: self.access_token, refresh_token, issued_at, expires_at })
    }
}

/// Vault-backed holder for the current token pair, with an in-memory copy so
/// the hot `current_access_token` path never touches the filesystem.
pub struct TokenStore {
    vault: SharedVault,
    current: Mutex<Option<TokenPair>>,
}

impl TokenStore {
    pub fn new(vault: SharedVault) -> Self {
        // A malformed persisted record reads as absent; never fatal at init.
        let current = vault.get_json_lenient::<TokenPair>(KEY_AUTH_TOKENS);
        if current.is_some() {
            debug!(target: "brandsight::session", "token store primed from vault");
        }
        TokenStore { vault, current: Mutex::new(current) }
    }

    /// Unexpired access token, if one is held. No I/O.
    pub fn current_access_token(&self) -> Option<String> {
        let guard = self.current.lock();
        let pair = guard.as_ref()?;
        if pair.is_access_expired(Utc::now()) { None } else { Some(pair.access_token.clone()) }
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.lock().as_ref().map(|p| p.refresh_token.clone())
    }

    pub fn pair(&self) -> Option<TokenPair> {
        self.current.lock().clone()
    }

    /// Persist a new pair. This is one of the two durable write points.
    pub fn save(&self, pair: &TokenPair) -> anyhow::Result<()> {
        self.vault.put_json(KEY_AUTH_TOKENS, pair)?;
        *self.current.lock() = Some(pair.clone());
        debug!(target: "brandsight::session", "token pair persisted, expires_at={}", pair.expires_at);
        Ok(())
    }

    /// Drop the pair from memory and the vault. The other durable write point.
    pub fn clear(&self) {
        *self.current.lock() = None;
        let _ = self.vault.remove(KEY_AUTH_TOKENS);
        debug!(target: "brandsight::session", "token store cleared");
    }
}
