use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use brandsight::cache::QueryCache;
use brandsight::client::AuthClient;
use brandsight::config::EngineConfig;
use brandsight::roles::effective_permissions;
use brandsight::session::{SessionCell, UserStoreBridge};
use brandsight::storage::Vault;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let cfg = EngineConfig::from_env();
    info!(
        target: "brandsight",
        "brandsight starting: RUST_LOG='{}', api_base='{}', vault='{}', idle={}s, session={}s",
        rust_log, cfg.api_base, cfg.vault_dir.display(),
        cfg.idle_timeout.as_secs(), cfg.session_timeout.as_secs()
    );

    let vault = Vault::open(&cfg.vault_dir)?;
    let session = SessionCell::new();
    let client = AuthClient::new(&cfg, vault.clone(), session.clone())?;
    let cache = QueryCache::new(vault, &cfg.cache_buster, cfg.cache_flush_interval);
    let bridge = UserStoreBridge::new(session.clone());

    let email = std::env::var("BRANDSIGHT_EMAIL").unwrap_or_default();
    let password = std::env::var("BRANDSIGHT_PASSWORD").unwrap_or_default();
    if email.is_empty() || password.is_empty() {
        info!(target: "brandsight", "set BRANDSIGHT_EMAIL and BRANDSIGHT_PASSWORD to log in");
        return Ok(());
    }

    let outcome = client.login(&email, &password).await?;
    info!(
        target: "brandsight",
        "logged in as {} ({}), landing at {}",
        outcome.user.email, outcome.user.role.as_str(), outcome.redirect_to
    );
    info!(target: "brandsight", "permissions: {:?}", effective_permissions(&outcome.user));

    bridge.ensure_loaded(&client).await;
    info!(target: "brandsight", "dashboard load state: {:?}", bridge.load_state());
    info!(target: "brandsight", "cached entries: {}", cache.len());
    Ok(())
}
