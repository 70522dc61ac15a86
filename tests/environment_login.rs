mod support;

use commandpost_lib::Environment;
use std::sync::{Arc, Mutex};
use support::{query_param, redirecting_browser, MockTokenServer, RecordingObserver, TestApp};

fn oauth_env(token_url: &str) -> Environment {
    let mut env = Environment::named("staging");
    env.base_url = "https://api.example.com".to_string();
    env.client_id = "cp-client".to_string();
    env.auth_url = "https://id.example.com/authorize".to_string();
    env.token_url = token_url.to_string();
    env.scope = "api".to_string();
    env.refresh_token = "old-refresh".to_string();
    env.oauth2_config = r#"{"accessToken":"","grantType":"authorization_code"}"#.to_string();
    env
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_persists_tokens_and_refresh_keeps_refresh_token() {
    let app = TestApp::new();
    app.write_test_settings();
    let ctx = app.start().await;

    let login_server = MockTokenServer::start(
        200,
        r#"{"access_token":"tok","refresh_token":"ref","expires_in":3600}"#,
    )
    .await;
    let mut env = oauth_env(&login_server.url);
    env.variables
        .insert("scope".to_string(), "api offline_access".to_string());
    commandpost_lib::save_environment(ctx.db(), &env)
        .await
        .expect("save env");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let browser = redirecting_browser("abc123", seen.clone());
    let observer = RecordingObserver::default();
    let logged_in =
        commandpost_lib::environment_oauth_login_observed(&ctx, env, &browser, &observer)
            .await
            .expect("login");
    assert_eq!(logged_in.access_token, "tok");
    assert_eq!(observer.releases(), 1);
    assert_eq!(
        query_param(&seen.lock().expect("lock")[0], "scope").as_deref(),
        Some("api offline_access")
    );

    let stored = commandpost_lib::get_environment(ctx.db(), "staging")
        .await
        .expect("get")
        .expect("stored env");
    assert_eq!(stored.access_token, "tok");
    assert_eq!(stored.refresh_token, "ref");
    assert!(!stored.expires_at.is_empty());
    let config: serde_json::Value =
        serde_json::from_str(&stored.oauth2_config).expect("oauth2_config json");
    assert_eq!(config["accessToken"], "tok");
    assert_eq!(config["grantType"], "authorization_code");

    let refresh_server = MockTokenServer::start(200, r#"{"access_token":"tok-2"}"#).await;
    let mut stored = stored;
    stored.token_url = refresh_server.url.clone();
    let refreshed = commandpost_lib::environment_refresh_token(&ctx, stored)
        .await
        .expect("refresh");
    assert_eq!(refreshed.access_token, "tok-2");
    assert_eq!(refreshed.refresh_token, "ref");

    let form = &refresh_server.requests()[0];
    assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(form.get("refresh_token").map(String::as_str), Some("ref"));

    let stored = commandpost_lib::get_environment(ctx.db(), "staging")
        .await
        .expect("get")
        .expect("stored env");
    assert_eq!(stored.access_token, "tok-2");
    assert_eq!(stored.refresh_token, "ref");

    ctx.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn login_requires_oauth_endpoints() {
    let app = TestApp::new();
    app.write_test_settings();
    let ctx = app.start().await;

    let mut env = oauth_env("");
    env.refresh_token.clear();
    let browser = |url: &str| assert!(url.is_empty(), "browser must not open: {url}");
    let err = commandpost_lib::environment_oauth_login(&ctx, env.clone(), &browser)
        .await
        .expect_err("no token url");
    assert_eq!(err.code(), "SEC_INVALID_INPUT");

    let err = commandpost_lib::environment_refresh_token(&ctx, env)
        .await
        .expect_err("no refresh token");
    assert_eq!(err.code(), "SEC_INVALID_INPUT");

    assert!(commandpost_lib::get_environments(ctx.db())
        .await
        .expect("list")
        .is_empty());
    ctx.shutdown().await.expect("shutdown");
}
