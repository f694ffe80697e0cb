//! Engine configuration resolved once at startup from environment variables
//! with compiled defaults. Timeout windows are deliberately configuration, not
//! constants: deployments tune them without a rebuild.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the remote auth authority, e.g. "https://api.brandsight.io".
    pub api_base: String,
    /// Root directory for the durable client-side vault.
    pub vault_dir: PathBuf,
    /// Silence window after which the session is considered idle.
    pub idle_timeout: Duration,
    /// Hard window after which an untouched session expires. Always strictly
    /// greater than `idle_timeout`.
    pub session_timeout: Duration,
    /// Version string keying the persisted query cache; changing it on deploy
    /// atomically invalidates every persisted entry.
    pub cache_buster: String,
    /// Minimum interval between durable cache flushes (writes are coalesced).
    pub cache_flush_interval: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let api_base = std::env::var("BRANDSIGHT_API_BASE")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let vault_dir = std::env::var("BRANDSIGHT_VAULT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".brandsight"));
        let idle_secs: u64 = std::env::var("BRANDSIGHT_IDLE_TIMEOUT_SECS").ok()
            .and_then(|s| s.parse().ok()).unwrap_or(600);
        let session_secs: u64 = std::env::var("BRANDSIGHT_SESSION_TIMEOUT_SECS").ok()
            .and_then(|s| s.parse().ok()).unwrap_or(1800);
        let cache_buster = std::env::var("BRANDSIGHT_CACHE_BUSTER")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());
        let flush_ms: u64 = std::env::var("BRANDSIGHT_CACHE_FLUSH_MS").ok()
            .and_then(|s| s.parse().ok()).unwrap_or(1000);
        // Expiry must outlast idleness or the monitor could expire a session
        // it never marked idle.
        let session_secs = session_secs.max(idle_secs + 1);
        Self {
            api_base,
            vault_dir,
            idle_timeout: Duration::from_secs(idle_secs),
            session_timeout: Duration::from_secs(session_secs),
            cache_buster,
            cache_flush_interval: Duration::from_millis(flush_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".to_string(),
            vault_dir: PathBuf::from(".brandsight"),
            idle_timeout: Duration::from_secs(600),
            session_timeout: Duration::from_secs(1800),
            cache_buster: env!("CARGO_PKG_VERSION").to_string(),
            cache_flush_interval: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_window_always_exceeds_idle_window() {
        let cfg = EngineConfig::default();
        assert!(cfg.session_timeout > cfg.idle_timeout);
    }
}
