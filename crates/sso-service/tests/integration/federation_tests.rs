//! E2E tests for federated login against a mocked Yandex ID.

use reqwest::header::SET_COOKIE;
use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use sso_test_utils::assertions::TokenAssertions;
use sso_test_utils::server_harness::TestSsoServer;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXTERNAL_ID: &str = "1000034426";
const EXTERNAL_EMAIL: &str = "pupil@yandex.ru";

async fn mock_yandex() -> MockServer {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya-access",
            "token_type": "bearer"
        })))
        .mount(&mock)
        .await;
    Mock::given(method("GET"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": EXTERNAL_ID,
            "default_email": EXTERNAL_EMAIL
        })))
        .mount(&mock)
        .await;
    mock
}

async fn spawn_with_yandex(mock: &MockServer) -> Result<TestSsoServer, anyhow::Error> {
    let uri = mock.uri();
    TestSsoServer::spawn_with(&[
        ("YANDEX_CLIENT_ID", "ya-app"),
        ("YANDEX_CLIENT_SECRET", "ya-secret"),
        ("YANDEX_REDIRECT_URI", "https://app.example/callback"),
        ("YANDEX_OAUTH_URL", uri.as_str()),
        ("YANDEX_LOGIN_URL", uri.as_str()),
    ])
    .await
}

/// Start a handshake and return the issued state.
async fn link(
    server: &TestSsoServer,
    realm: &str,
    redirect_target: Option<&str>,
) -> Result<String, anyhow::Error> {
    let mut request = reqwest::Client::new().get(format!("{}/{}/yandex/link", server.url(), realm));
    if let Some(target) = redirect_target {
        request = request.query(&[("redirect_target", target)]);
    }
    let response = request.send().await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    let state = body["state"].as_str().expect("state").to_string();

    let authorize = Url::parse(body["authorization_url"].as_str().expect("url"))?;
    assert_eq!(authorize.path(), "/authorize");
    let params: std::collections::HashMap<_, _> = authorize.query_pairs().into_owned().collect();
    assert_eq!(params.get("state"), Some(&state));
    assert_eq!(
        params.get("code_challenge_method").map(String::as_str),
        Some("S256")
    );
    assert!(params.contains_key("code_challenge"));

    Ok(state)
}

async fn complete(
    server: &TestSsoServer,
    realm: &str,
    mode: &str,
    state: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/yandex/{}", server.url(), realm, mode))
        .json(&json!({"code": "ya-code", "state": state}))
        .send()
        .await?)
}

#[tokio::test]
async fn test_registration_then_authentication() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", Some("https://app.example/home")).await?;
    let response = complete(&server, "edu", "registration", &state).await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get(SET_COOKIE).is_some());

    let body: Value = response.json().await?;
    assert_eq!(body["redirect_target"], "https://app.example/home");
    let access = body["access_token"].as_str().expect("access").to_string();
    access.assert_valid_jwt().assert_in_realm("edu");
    let subject = sso_test_utils::assertions::decode_claims(&access).sub;

    // The identity is now linked, so authentication signs the same user in.
    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "edu", "authentication", &state).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert!(body.get("redirect_target").is_none());
    body["access_token"]
        .as_str()
        .expect("access")
        .to_string()
        .assert_for_subject(&subject);

    assert_eq!(server.users().user_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_state_is_single_use() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", None).await?;
    let first = complete(&server, "edu", "registration", &state).await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = complete(&server, "edu", "registration", &state).await?;
    assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
    let body: Value = second.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_STATE");
    Ok(())
}

#[tokio::test]
async fn test_unknown_state_rejected() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;

    let response = complete(&server, "edu", "authentication", "never-issued").await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_state_bound_to_realm() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "admission", "registration", &state).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // The failed attempt consumed the state.
    let retry = complete(&server, "edu", "registration", &state).await?;
    assert_eq!(retry.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.users().user_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_authentication_without_link_conflicts() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "edu", "registration", &state).await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Identities are linked per realm.
    let state = link(&server, "admission", None).await?;
    let response = complete(&server, "admission", "authentication", &state).await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "IDENTITY_CONFLICT");
    Ok(())
}

#[tokio::test]
async fn test_registration_email_collision_conflicts() -> Result<(), anyhow::Error> {
    let mock = mock_yandex().await;
    let server = spawn_with_yandex(&mock).await?;
    server
        .register_user("edu", EXTERNAL_EMAIL, "local password")
        .await?;

    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "edu", "registration", &state).await?;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(server.users().user_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_provider_rejection_is_unauthorized() -> Result<(), anyhow::Error> {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&mock)
        .await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "edu", "registration", &state).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.users().user_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_provider_outage_is_service_unavailable() -> Result<(), anyhow::Error> {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock)
        .await;
    let server = spawn_with_yandex(&mock).await?;

    let state = link(&server, "edu", None).await?;
    let response = complete(&server, "edu", "registration", &state).await?;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn test_unconfigured_provider_not_found() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = reqwest::get(format!("{}/edu/vk/link", server.url())).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = reqwest::get(format!("{}/edu/github/link", server.url())).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
