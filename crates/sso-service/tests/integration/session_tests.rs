//! E2E tests for login sessions: login, refresh rotation, replay
//! detection, realm switch and logout.

use futures::future::join_all;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use sso_service::models::CAUSE_REVOKED;
use sso_test_utils::assertions::{decode_claims, TokenAssertions};
use sso_test_utils::server_harness::TestSsoServer;

const EMAIL: &str = "alice@example.com";
const PASSWORD: &str = "correct horse battery";

struct Pair {
    access: String,
    refresh: String,
    session_cookie: String,
}

async fn parse_pair(response: Response) -> Result<Pair, anyhow::Error> {
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .expect("session cookie should be set")
        .to_str()?
        .to_string();
    let session_cookie = set_cookie
        .split(';')
        .next()
        .expect("cookie pair")
        .to_string();

    let body: Value = response.json().await?;
    Ok(Pair {
        access: body["access_token"].as_str().expect("access").to_string(),
        refresh: body["refresh_token"].as_str().expect("refresh").to_string(),
        session_cookie,
    })
}

async fn login(server: &TestSsoServer, realm: &str) -> Result<Pair, anyhow::Error> {
    let response = reqwest::Client::new()
        .post(format!("{}/{}/auth/login", server.url(), realm))
        .json(&json!({"email": EMAIL, "password": PASSWORD}))
        .send()
        .await?;
    parse_pair(response).await
}

async fn refresh(
    server: &TestSsoServer,
    realm: &str,
    refresh_token: &str,
) -> Result<Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/auth/refresh", server.url(), realm))
        .json(&json!({ "refresh_token": refresh_token }))
        .send()
        .await?)
}

async fn introspect(server: &TestSsoServer, realm: &str, token: &str) -> Result<Value, anyhow::Error> {
    Ok(reqwest::Client::new()
        .post(format!("{}/{}/oauth/introspect", server.url(), realm))
        .json(&json!({ "token": token }))
        .send()
        .await?
        .json()
        .await?)
}

async fn server_with_user() -> Result<(TestSsoServer, String), anyhow::Error> {
    let server = TestSsoServer::spawn().await?;
    let user_id = server.register_user("edu", EMAIL, PASSWORD).await?;
    Ok((server, user_id.to_string()))
}

#[tokio::test]
async fn test_login_issues_pair_and_cookie() -> Result<(), anyhow::Error> {
    let (server, user_id) = server_with_user().await?;

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/login", server.url()))
        .json(&json!({"email": EMAIL, "password": PASSWORD}))
        .send()
        .await?;
    let set_cookie = response
        .headers()
        .get(SET_COOKIE)
        .expect("session cookie should be set")
        .to_str()?
        .to_string();
    assert!(set_cookie.starts_with("session_id="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains(&format!(
        "Max-Age={}",
        server.config().session_ttl_seconds
    )));

    let pair = parse_pair(response).await?;
    pair.access
        .assert_valid_jwt()
        .assert_token_type("access")
        .assert_for_subject(&user_id)
        .assert_in_realm("edu")
        .assert_lifetime(server.config().access_token_ttl_seconds);
    pair.refresh
        .assert_valid_jwt()
        .assert_token_type("refresh")
        .assert_lifetime(server.config().refresh_token_ttl_seconds);

    let session_id = decode_claims(&pair.refresh).session_id.expect("session_id claim");
    assert_eq!(pair.session_cookie, format!("session_id={session_id}"));
    Ok(())
}

#[tokio::test]
async fn test_login_failures_are_uniform() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for (realm, email, password) in [
        ("edu", EMAIL, "wrong"),
        ("edu", "nobody@example.com", PASSWORD),
        ("admission", EMAIL, PASSWORD),
    ] {
        let response = client
            .post(format!("{}/{}/auth/login", server.url(), realm))
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        bodies.push(response.json::<Value>().await?);
    }

    assert!(bodies.iter().all(|b| b == &bodies[0]));
    assert_eq!(bodies[0]["error"]["code"], "INVALID_CREDENTIALS");
    Ok(())
}

/// After rotation T2 is active and T1 is revoked; presenting T1 is a
/// replay and takes the whole session down.
#[tokio::test]
async fn test_refresh_rotation_revokes_previous_token() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let first = login(&server, "edu").await?;

    let second = parse_pair(refresh(&server, "edu", &first.refresh).await?).await?;
    assert_ne!(first.refresh, second.refresh);
    assert_eq!(
        decode_claims(&first.refresh).session_id,
        decode_claims(&second.refresh).session_id,
        "rotation keeps the session"
    );

    assert_eq!(introspect(&server, "edu", &second.refresh).await?["active"], true);

    let stale = introspect(&server, "edu", &first.refresh).await?;
    assert_eq!(stale, json!({"active": false, "cause": CAUSE_REVOKED}));

    let after_replay = introspect(&server, "edu", &second.refresh).await?;
    assert_eq!(after_replay["active"], false);
    Ok(())
}

#[tokio::test]
async fn test_refresh_replay_is_rejected() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let first = login(&server, "edu").await?;
    let second = parse_pair(refresh(&server, "edu", &first.refresh).await?).await?;

    let replay = refresh(&server, "edu", &first.refresh).await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

    // The replay destroyed the session, so the legitimate holder is out too.
    let legit = refresh(&server, "edu", &second.refresh).await?;
    assert_eq!(legit.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_refresh_single_winner() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let pair = login(&server, "edu").await?;

    let attempts = (0..8).map(|_| refresh(&server, "edu", &pair.refresh));
    let responses = join_all(attempts).await;

    let mut winners = Vec::new();
    for response in responses {
        let response = response?;
        match response.status() {
            StatusCode::OK => winners.push(parse_pair(response).await?),
            StatusCode::UNAUTHORIZED => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(winners.len(), 1, "exactly one rotation may succeed");

    // The losers were replays, so the session is gone.
    let winner = introspect(&server, "edu", &winners[0].refresh).await?;
    assert_eq!(winner["active"], false);
    Ok(())
}

#[tokio::test]
async fn test_refresh_in_foreign_realm_unauthorized() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let pair = login(&server, "edu").await?;

    let response = refresh(&server, "admission", &pair.refresh).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A rejected realm check must not disturb the session.
    assert_eq!(introspect(&server, "edu", &pair.refresh).await?["active"], true);
    Ok(())
}

#[tokio::test]
async fn test_switch_realm_within_group() -> Result<(), anyhow::Error> {
    let (server, user_id) = server_with_user().await?;
    let pair = login(&server, "edu").await?;

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/switch-realm", server.url()))
        .json(&json!({"target_realm": "admission", "refresh_token": pair.refresh}))
        .send()
        .await?;
    let switched = parse_pair(response).await?;

    switched
        .access
        .assert_in_realm("admission")
        .assert_for_subject(&user_id);
    switched.refresh.assert_in_realm("admission");
    assert_eq!(
        introspect(&server, "admission", &switched.access).await?["active"],
        true
    );

    // The old edu refresh token was rotated away.
    let old = refresh(&server, "edu", &pair.refresh).await?;
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_switch_realm_outside_group_forbidden() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let pair = login(&server, "edu").await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/edu/auth/switch-realm", server.url()))
        .json(&json!({"target_realm": "hr", "refresh_token": pair.refresh}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = client
        .post(format!("{}/edu/auth/switch-realm", server.url()))
        .json(&json!({"target_realm": "atlantis", "refresh_token": pair.refresh}))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Neither rejection touched the session.
    assert_eq!(introspect(&server, "edu", &pair.refresh).await?["active"], true);
    Ok(())
}

#[tokio::test]
async fn test_logout_destroys_session_and_revokes_access() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let pair = login(&server, "edu").await?;

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/logout", server.url()))
        .header(COOKIE, &pair.session_cookie)
        .json(&json!({ "access_token": pair.access }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cleared = response
        .headers()
        .get(SET_COOKIE)
        .expect("cookie should be cleared")
        .to_str()?;
    assert!(cleared.contains("Max-Age=0"));

    assert_eq!(
        introspect(&server, "edu", &pair.access).await?,
        json!({"active": false, "cause": CAUSE_REVOKED})
    );
    assert_eq!(
        introspect(&server, "edu", &pair.refresh).await?,
        json!({"active": false, "cause": CAUSE_REVOKED})
    );
    Ok(())
}

#[tokio::test]
async fn test_logout_without_body_keeps_access_token() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;
    let pair = login(&server, "edu").await?;

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/logout", server.url()))
        .header(COOKIE, &pair.session_cookie)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(introspect(&server, "edu", &pair.access).await?["active"], true);
    assert_eq!(introspect(&server, "edu", &pair.refresh).await?["active"], false);
    Ok(())
}

#[tokio::test]
async fn test_logout_without_cookie_unauthorized() -> Result<(), anyhow::Error> {
    let (server, _) = server_with_user().await?;

    let response = reqwest::Client::new()
        .post(format!("{}/edu/auth/logout", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
