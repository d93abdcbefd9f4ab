//! E2E tests for token introspection and realm isolation.

use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};
use sso_service::crypto::{generate_jti, TokenCodec};
use sso_service::models::{TokenClaims, TokenType, CAUSE_EXPIRED, CAUSE_REVOKED};
use sso_test_utils::crypto_fixtures::test_signing_key;
use sso_test_utils::server_harness::TestSsoServer;

async fn issue_client_token(server: &TestSsoServer, realm: &str) -> Result<String, anyhow::Error> {
    server
        .register_client(realm, "c1", "s1", &["api:read"])
        .await?;
    let body: Value = reqwest::Client::new()
        .post(format!("{}/{}/oauth/token", server.url(), realm))
        .json(&json!({"grant_type": "client_credentials", "client_id": "c1", "client_secret": "s1"}))
        .send()
        .await?
        .json()
        .await?;
    Ok(body["access_token"]
        .as_str()
        .expect("access_token should be a string")
        .to_string())
}

async fn introspect(
    server: &TestSsoServer,
    realm: &str,
    token: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/oauth/introspect", server.url(), realm))
        .json(&json!({ "token": token }))
        .send()
        .await?)
}

fn access_claims(server: &TestSsoServer, realm: &str, iat: i64, exp: i64) -> TokenClaims {
    TokenClaims {
        sub: "c1".to_string(),
        iss: server.config().issuer.clone(),
        realm: realm.to_string(),
        token_type: TokenType::Access,
        scope: "api:read".to_string(),
        iat,
        exp,
        jti: generate_jti(),
        session_id: None,
    }
}

/// A token from realm A is rejected under realm B, even inside one group.
#[tokio::test]
async fn test_introspect_foreign_realm_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    let token = issue_client_token(&server, "edu").await?;

    for realm in ["admission", "hr"] {
        let response = introspect(&server, realm, &token).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "realm {realm}");
        let body: Value = response.json().await?;
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }
    Ok(())
}

#[tokio::test]
async fn test_introspect_forged_signature_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    let foreign_key = test_signing_key(2)?;
    let foreign = TokenCodec::from_pkcs8(
        &foreign_key.pkcs8,
        &server.config().signing_key_id,
        &server.config().issuer,
        0,
    )?;
    let now = Utc::now().timestamp();
    let forged = foreign.sign(&access_claims(&server, "edu", now, now + 600))?;

    let response = introspect(&server, "edu", &forged).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_introspect_expired_token_inactive() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    let now = Utc::now().timestamp();
    let expired = server
        .codec()?
        .sign(&access_claims(&server, "edu", now - 1000, now - 100))?;

    let response = introspect(&server, "edu", &expired).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body, json!({"active": false, "cause": CAUSE_EXPIRED}));
    Ok(())
}

#[tokio::test]
async fn test_introspect_garbage_token_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;

    let response = introspect(&server, "edu", "not-a-jwt").await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// A fresh user access token lives exactly the configured access TTL.
#[tokio::test]
async fn test_introspect_fresh_access_token_active() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    server
        .register_user("edu", "alice@example.com", "correct horse")
        .await?;

    let pair: Value = reqwest::Client::new()
        .post(format!("{}/edu/auth/login", server.url()))
        .json(&json!({"email": "alice@example.com", "password": "correct horse"}))
        .send()
        .await?
        .json()
        .await?;
    let access = pair["access_token"].as_str().expect("access token");

    let body: Value = introspect(&server, "edu", access).await?.json().await?;

    assert_eq!(body["active"], true);
    assert_eq!(body["token_type"], "access");
    let lifetime = body["exp"].as_i64().expect("exp") - body["iat"].as_i64().expect("iat");
    assert_eq!(lifetime, server.config().access_token_ttl_seconds);
    assert_ne!(body["jti"], Value::Null);

    let refresh = pair["refresh_token"].as_str().expect("refresh token");
    let refresh_body: Value = introspect(&server, "edu", refresh).await?.json().await?;
    assert_eq!(refresh_body["active"], true);
    assert_ne!(refresh_body["jti"], body["jti"], "access and refresh jti must differ");
    Ok(())
}

#[tokio::test]
async fn test_introspect_refresh_without_session_revoked() -> Result<(), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    let now = Utc::now().timestamp();
    let mut claims = access_claims(&server, "edu", now, now + 600);
    claims.token_type = TokenType::Refresh;
    claims.session_id = Some("no-such-session".to_string());
    let orphan = server.codec()?.sign(&claims)?;

    let body: Value = introspect(&server, "edu", &orphan).await?.json().await?;

    assert_eq!(body, json!({"active": false, "cause": CAUSE_REVOKED}));
    Ok(())
}
