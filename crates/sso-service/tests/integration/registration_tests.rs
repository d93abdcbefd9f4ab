//! E2E tests for password self-registration.

use reqwest::StatusCode;
use serde_json::{json, Value};
use sso_test_utils::assertions::TokenAssertions;
use sso_test_utils::server_harness::TestSsoServer;

async fn register(
    server: &TestSsoServer,
    realm: &str,
    email: &str,
    password: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/registration", server.url(), realm))
        .json(&json!({"email": email, "password": password}))
        .send()
        .await?)
}

#[tokio::test]
async fn test_register_then_login() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = register(&server, "edu", "  New.User@Example.com ", "pa55word").await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let user: Value = response.json().await?;
    assert_eq!(user["email"], "new.user@example.com");
    assert_eq!(user["realm"], "edu");
    assert!(user.get("password").is_none());
    assert!(user.get("password_hash").is_none());
    let user_id = user["user_id"].as_str().expect("user_id").to_string();

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/login", server.url()))
        .json(&json!({"email": "new.user@example.com", "password": "pa55word"}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    body["access_token"]
        .as_str()
        .expect("access")
        .to_string()
        .assert_for_subject(&user_id)
        .assert_in_realm("edu");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let first = register(&server, "edu", "dup@example.com", "pa55word").await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = register(&server, "edu", "DUP@example.com", "other").await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: Value = second.json().await?;
    assert_eq!(body["error"]["code"], "IDENTITY_CONFLICT");

    // Accounts are per realm.
    let other_realm = register(&server, "admission", "dup@example.com", "pa55word").await?;
    assert_eq!(other_realm.status(), StatusCode::CREATED);
    assert_eq!(server.users().user_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_registration_in_unknown_realm() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = register(&server, "atlantis", "x@example.com", "pa55word").await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
