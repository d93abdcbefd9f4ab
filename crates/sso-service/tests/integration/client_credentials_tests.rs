//! E2E tests for the client-credentials grant.
//!
//! ## Test Naming
//!
//! Tests follow the convention: `test_<feature>_<scenario>_<expected_result>`

use reqwest::StatusCode;
use serde_json::{json, Value};
use sso_test_utils::assertions::{decode_claims, TokenAssertions};
use sso_test_utils::server_harness::TestSsoServer;

async fn request_token(
    server: &TestSsoServer,
    realm: &str,
    body: Value,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/oauth/token", server.url(), realm))
        .json(&body)
        .send()
        .await?)
}

/// Client `c1` in realm `edu` gets a token, and introspection in `edu`
/// reports it active with the granted scope.
#[tokio::test]
async fn test_client_credentials_then_introspect_end_to_end() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server
        .register_client("edu", "c1", "s1", &["api:read"])
        .await?;

    let response = request_token(
        &server,
        "edu",
        json!({
            "grant_type": "client_credentials",
            "client_id": "c1",
            "client_secret": "s1",
            "scope": "api:read"
        }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    assert_eq!(body["token_type"], "Bearer");
    assert!(body.get("refresh_token").is_none(), "No refresh token for machine clients");

    let access_token = body["access_token"]
        .as_str()
        .expect("access_token should be a string")
        .to_string();
    access_token
        .assert_valid_jwt()
        .assert_token_type("access")
        .assert_in_realm("edu")
        .assert_for_subject("c1")
        .assert_has_scope("api:read")
        .assert_lifetime(server.config().client_token_ttl_seconds);
    assert_eq!(body["expires_at"].as_i64(), Some(decode_claims(&access_token).exp));

    let introspection: Value = reqwest::Client::new()
        .post(format!("{}/edu/oauth/introspect", server.url()))
        .json(&json!({ "token": access_token }))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(introspection["active"], true);
    assert_eq!(introspection["sub"], "c1");
    assert_eq!(introspection["realm"], "edu");
    assert_eq!(introspection["scope"], "api:read");
    assert_eq!(introspection["token_type"], "access");
    Ok(())
}

#[tokio::test]
async fn test_client_credentials_empty_scope_grants_all_allowed() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server
        .register_client("edu", "c1", "s1", &["api:read", "api:write"])
        .await?;

    let response = request_token(
        &server,
        "edu",
        json!({"grant_type": "client_credentials", "client_id": "c1", "client_secret": "s1"}),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    body["access_token"]
        .as_str()
        .expect("access_token should be a string")
        .to_string()
        .assert_has_scope("api:read")
        .assert_has_scope("api:write");
    Ok(())
}

#[tokio::test]
async fn test_client_credentials_over_broad_scope_forbidden() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server
        .register_client("edu", "c1", "s1", &["api:read"])
        .await?;

    let response = request_token(
        &server,
        "edu",
        json!({
            "grant_type": "client_credentials",
            "client_id": "c1",
            "client_secret": "s1",
            "scope": "api:read api:admin"
        }),
    )
    .await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_SCOPE");
    assert!(body.get("access_token").is_none());
    Ok(())
}

/// Unknown client and wrong secret fail with the same body.
#[tokio::test]
async fn test_client_credentials_bad_credentials_uniform() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server
        .register_client("edu", "c1", "s1", &["api:read"])
        .await?;

    let wrong_secret = request_token(
        &server,
        "edu",
        json!({"grant_type": "client_credentials", "client_id": "c1", "client_secret": "nope"}),
    )
    .await?;
    let unknown_client = request_token(
        &server,
        "edu",
        json!({"grant_type": "client_credentials", "client_id": "ghost", "client_secret": "s1"}),
    )
    .await?;
    // Registered in edu, presented to admission.
    let wrong_realm = request_token(
        &server,
        "admission",
        json!({"grant_type": "client_credentials", "client_id": "c1", "client_secret": "s1"}),
    )
    .await?;

    let mut bodies = Vec::new();
    for response in [wrong_secret, unknown_client, wrong_realm] {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        bodies.push(response.json::<Value>().await?);
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    assert_eq!(bodies[0]["error"]["code"], "INVALID_CREDENTIALS");
    Ok(())
}

#[tokio::test]
async fn test_client_credentials_unsupported_grant_type_bad_request() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = request_token(
        &server,
        "edu",
        json!({"grant_type": "password", "client_id": "c1", "client_secret": "s1"}),
    )
    .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "UNSUPPORTED_GRANT_TYPE");
    Ok(())
}

#[tokio::test]
async fn test_client_credentials_unknown_realm_not_found() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = request_token(
        &server,
        "atlantis",
        json!({"grant_type": "client_credentials", "client_id": "c1", "client_secret": "s1"}),
    )
    .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
