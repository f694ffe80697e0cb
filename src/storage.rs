//!
//! brandsight vault module
//! -----------------------
//! Durable client-side key/value storage backing the token store and the
//! persisted query cache. Layout is one JSON file per key under a configured
//! root directory.
//!
//! Key responsibilities:
//! - Raw and typed (serde) reads/writes with lenient handling of corrupt
//!   payloads: a value that fails to parse reads as absent, never as a crash.
//! - One-time migration of the legacy discrete keys (`access_token`,
//!   `refresh_token`, `user_data`) into the canonical `auth_tokens` record at
//!   open time, so no call site ever branches on which key is populated.
//!
//! The public API centers around the `Vault` type, usually wrapped in a
//! `SharedVault` (`Arc<Vault>`) and handed to the session and cache layers.

use std::{fs, path::{Path, PathBuf}};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Canonical token record: `{access_token, refresh_token, issued_at, expires_at}`.
pub const KEY_AUTH_TOKENS: &str = "auth_tokens";
/// Legacy discrete keys, consumed once by migration and then removed.
pub const KEY_LEGACY_ACCESS: &str = "access_token";
pub const KEY_LEGACY_REFRESH: &str = "refresh_token";
pub const KEY_LEGACY_USER: &str = "user_data";
/// Namespace for the persisted query cache, versioned by a buster string.
pub const KEY_QUERY_CACHE: &str = "REACT_QUERY_OFFLINE_CACHE";

pub struct Vault {
    root: PathBuf,
    /// Profile payload recovered from the legacy `user_data` key, if migration
    /// found one. Consumed once by the session layer to prefill state.
    legacy_user: Mutex<Option<serde_json::Value>>,
}

pub type SharedVault = Arc<Vault>;

impl Vault {
    /// Open (creating if needed) a vault rooted at the given directory and run
    /// the one-time legacy-key migration.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<SharedVault> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating vault dir '{}'", root.display()))?;
        let vault = Vault { root, legacy_user: Mutex::new(None) };
        vault.migrate_legacy_keys();
        Ok(Arc::new(vault))
    }

    pub fn root_path(&self) -> &PathBuf { &self.root }

    fn key_path(&self, key: &str) -> PathBuf { self.root.join(format!("{}.json", key)) }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.key_path(key)).ok()
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key);
        fs::write(&path, value)
            .with_context(|| format!("writing vault key '{}'", key))?;
        debug!(target: "brandsight::storage", "vault.put key='{}' bytes={}", key, value.len());
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("removing vault key '{}'", key))?;
            debug!(target: "brandsight::storage", "vault.remove key='{}'", key);
        }
        Ok(())
    }

    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)
            .with_context(|| format!("serializing vault key '{}'", key))?;
        self.put_raw(key, &text)
    }

    /// Typed read that treats a corrupt payload as absent. The bad value is
    /// removed so the corruption is not re-reported on every read.
    pub fn get_json_lenient<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str::<T>(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(target: "brandsight::storage",
                    "vault key '{}' is malformed ({}); treating as absent", key, e);
                let _ = self.remove(key);
                None
            }
        }
    }

    /// Remove every persisted key. Backs the clear-all-local-data recovery
    /// action on session expiry.
    pub fn purge_all(&self) -> Result<()> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("reading vault dir '{}'", self.root.display()))?;
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                fs::remove_file(&path).ok();
                removed += 1;
            }
        }
        debug!(target: "brandsight::storage", "vault.purge_all removed={}", removed);
        Ok(())
    }

    /// Profile JSON recovered from the legacy `user_data` key, surrendered at
    /// most once.
    pub fn take_legacy_user(&self) -> Option<serde_json::Value> {
        self.legacy_user.lock().take()
    }

    /// Fold the legacy discrete token keys into the canonical `auth_tokens`
    /// record, then delete them. Legacy keys carried no expiry metadata, so a
    /// migrated pair is written already expired: the first authenticated call
    /// goes through a refresh and picks up real expiry data.
    fn migrate_legacy_keys(&self) {
        let access = self.get_raw(KEY_LEGACY_ACCESS);
        let refresh = self.get_raw(KEY_LEGACY_REFRESH);
        if self.get_raw(KEY_AUTH_TOKENS).is_none() {
            if let (Some(access), Some(refresh)) = (access.as_deref(), refresh.as_deref()) {
                let now = Utc::now();
                let record = serde_json::json!({
                    "access_token": access.trim_matches('"'),
                    "refresh_token": refresh.trim_matches('"'),
                    "issued_at": now - ChronoDuration::seconds(60),
                    "expires_at": now - ChronoDuration::seconds(1),
                });
                if let Err(e) = self.put_json(KEY_AUTH_TOKENS, &record) {
                    warn!(target: "brandsight::storage", "legacy token migration failed: {}", e);
                } else {
                    debug!(target: "brandsight::storage", "migrated legacy token keys into '{}'", KEY_AUTH_TOKENS);
                }
            }
        }
        if let Some(raw) = self.get_raw(KEY_LEGACY_USER) {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&raw) {
                *self.legacy_user.lock() = Some(v);
            }
        }
        for key in [KEY_LEGACY_ACCESS, KEY_LEGACY_REFRESH, KEY_LEGACY_USER] {
            let _ = self.remove(key);
        }
    }
}
