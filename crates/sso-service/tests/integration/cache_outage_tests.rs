//! E2E tests for behavior while the session cache is failing.
//!
//! Every cache call is retried once, so two injected failures make an
//! operation fail and one is absorbed.

use reqwest::StatusCode;
use serde_json::{json, Value};
use sso_test_utils::server_harness::TestSsoServer;

const EMAIL: &str = "bob@example.com";
const PASSWORD: &str = "hunter2hunter2";

async fn login(server: &TestSsoServer) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/edu/auth/login", server.url()))
        .json(&json!({"email": EMAIL, "password": PASSWORD}))
        .send()
        .await?)
}

#[tokio::test]
async fn test_login_fails_closed_during_outage() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server.register_user("edu", EMAIL, PASSWORD).await?;

    server.cache().inject_failures(2);
    let response = login(&server).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");

    // No half-open session was left behind.
    assert!(server.cache().is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_single_cache_failure_is_retried() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server.register_user("edu", EMAIL, PASSWORD).await?;

    server.cache().inject_failures(1);
    let response = login(&server).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_introspection_never_reports_inactive_on_outage() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server.register_user("edu", EMAIL, PASSWORD).await?;
    let body: Value = login(&server).await?.json().await?;
    let access = body["access_token"].as_str().expect("access").to_string();

    server.cache().inject_failures(2);
    let response = reqwest::Client::new()
        .post(format!("{}/edu/oauth/introspect", server.url()))
        .json(&json!({ "token": access }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Once the cache recovers the token is still good.
    let response = reqwest::Client::new()
        .post(format!("{}/edu/oauth/introspect", server.url()))
        .json(&json!({ "token": access }))
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["active"], true);
    Ok(())
}

#[tokio::test]
async fn test_client_credentials_unaffected_by_outage() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server.register_client("edu", "c1", "s1", &["api:read"]).await?;

    server.cache().inject_failures(2);
    let response = reqwest::Client::new()
        .post(format!("{}/edu/oauth/token", server.url()))
        .json(&json!({
            "grant_type": "client_credentials",
            "client_id": "c1",
            "client_secret": "s1"
        }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
