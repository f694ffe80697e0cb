//! Interceptor contract: at most two network attempts per logical call, one
//! refresh-then-retry cycle on 401, forced logout with a single login
//! redirect when the retry also fails, and pass-through for everything else.

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Method;
use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use brandsight::client::AuthClient;
use brandsight::config::EngineConfig;
use brandsight::error::AuthError;
use brandsight::session::{SessionCell, SharedSession};
use brandsight::storage::{SharedVault, Vault, KEY_AUTH_TOKENS};

/// Engine with an unexpired access token the server may still reject; this is
/// the path that exercises the 401-driven refresh rather than the local
/// expiry check.
fn engine_with_live_token(
    server: &MockServer,
    tmp: &tempfile::TempDir,
    access: &str,
) -> (AuthClient, SharedSession, SharedVault) {
    let vault = Vault::open(tmp.path()).unwrap();
    let now = Utc::now();
    vault
        .put_json(
            KEY_AUTH_TOKENS,
            &serde_json::json!({
                "access_token": access,
                "refresh_token": "refresh-1",
                "issued_at": now,
                "expires_at": now + ChronoDuration::hours(1),
            }),
        )
        .unwrap();
    let session = SessionCell::new();
    let cfg = EngineConfig {
        api_base: server.uri(),
        vault_dir: tmp.path().to_path_buf(),
        ..EngineConfig::default()
    };
    let client = AuthClient::new(&cfg, vault.clone(), session.clone()).unwrap();
    (client, session, vault)
}

fn refresh_grant() -> serde_json::Value {
    serde_json::json!({
        "access_token": "refreshed-access",
        "refresh_token": "refresh-2",
        "expires_in": 900,
    })
}

#[tokio::test]
async fn retry_after_refresh_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer revoked-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer refreshed-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "u1", "email": "u1@example.com", "role": "brand_premium",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_grant()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, _vault) = engine_with_live_token(&server, &tmp, "revoked-access");

    let user = client.me().await.unwrap();
    assert_eq!(user.email, "u1@example.com");
    assert_eq!(session.snapshot().user.unwrap().id, "u1");
}

#[tokio::test]
async fn second_401_forces_logout_with_one_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_grant()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, vault) = engine_with_live_token(&server, &tmp, "revoked-access");
    let mut redirects = session.redirects();

    let result = client.me().await;
    assert!(matches!(result.unwrap_err(), AuthError::Authorization { .. }));

    // At most two underlying attempts for one logical call
    let me_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/auth/me")
        .count();
    assert_eq!(me_calls, 2);

    // State and vault cleared, exactly one redirect to the login path
    assert!(!session.snapshot().is_authenticated);
    assert!(vault.get_raw(KEY_AUTH_TOKENS).is_none());
    assert_eq!(redirects.try_recv().unwrap().path, "/login");
    assert!(redirects.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_failing_calls_force_logout_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_grant()))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, _vault) = engine_with_live_token(&server, &tmp, "revoked-access");
    let mut redirects = session.redirects();

    // Both calls fail after the (joined) refresh and both reach the
    // forced-logout path; only the first records the notice and redirects.
    let (a, b) = tokio::join!(client.me(), client.me());
    assert!(a.is_err());
    assert!(b.is_err());

    assert_eq!(redirects.try_recv().unwrap().path, "/login");
    assert!(redirects.try_recv().is_err());
    let notice = session.snapshot().expiry_notice.unwrap();
    assert_eq!(notice.reason, "unauthorized_after_refresh");
}

#[tokio::test]
async fn rejected_refresh_during_retry_also_forces_logout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, _vault) = engine_with_live_token(&server, &tmp, "revoked-access");
    let mut redirects = session.redirects();

    let result = client.me().await;
    assert!(result.unwrap_err().forces_logout());
    assert!(!session.snapshot().is_authenticated);
    assert_eq!(redirects.try_recv().unwrap().path, "/login");
    assert!(redirects.try_recv().is_err());
}

#[tokio::test]
async fn non_authorization_failures_pass_through_unmodified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
            "message": "exploded",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, _vault) = engine_with_live_token(&server, &tmp, "live-access");

    // Raw interceptor view: the 500 is delivered as-is, no refresh, no retry.
    let resp = client
        .fetch_with_auth(Method::GET, "/auth/me", None)
        .await
        .unwrap();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.body["message"], "exploded");
    // Session untouched by a server error
    assert!(session.snapshot().expiry_notice.is_none());
}

#[tokio::test]
async fn expiry_notice_names_the_condition_and_is_recoverable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(refresh_grant()))
        .mount(&server)
        .await;

    let tmp = tempdir().unwrap();
    let (client, session, vault) = engine_with_live_token(&server, &tmp, "revoked-access");
    vault.put_raw("some_cached_thing", "{}").unwrap();

    let _ = client.me().await;
    let notice = session.snapshot().expiry_notice.unwrap();
    assert_eq!(notice.reason, "unauthorized_after_refresh");

    // Recovery action two wipes all local session data
    client.clear_all_and_reauthenticate();
    assert!(vault.get_raw("some_cached_thing").is_none());
    assert!(!session.snapshot().is_authenticated);
}
