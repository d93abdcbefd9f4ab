//! End-user endpoints: password registration, login, refresh, realm switch
//! and logout.
//!
//! Every endpoint that opens or rotates a session sets the `session_id`
//! cookie again, so its `Max-Age` tracks the session's extended expiry.

use crate::errors::SsoError;
use crate::handlers::{observe_issuance, pair_response, session_cookie::session_id_from};
use crate::models::{
    IssuedTokens, LoginRequest, LogoutRequest, RefreshRequest, RegisteredUser, RegistrationRequest,
    SwitchRealmRequest,
};
use crate::observability::record_failure;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Pair body plus the `session_id` cookie.
pub(crate) fn session_response(
    state: &AppState,
    status: StatusCode,
    issued: &IssuedTokens,
    redirect_target: Option<String>,
) -> Result<Response, SsoError> {
    let body = pair_response(issued, redirect_target)?;
    let session_id = issued
        .session_id
        .as_deref()
        .ok_or_else(|| SsoError::Internal("session issuance without session id".to_string()))?;
    let cookie = state.session_cookie.issue(session_id)?;

    Ok((status, [(SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Handle a password self-registration.
///
/// POST /{realm}/registration
///
/// Returns 201 with the new user. No session is opened.
#[instrument(name = "sso.auth.register", skip_all, fields(realm = tracing::field::Empty))]
pub async fn handle_sign_up(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegisteredUser>), SsoError> {
    tracing::Span::current().record("realm", realm.as_str());

    let email = payload.email.trim().to_lowercase();
    match state
        .user_auth
        .register_user(&email, &payload.password, &realm)
        .await
    {
        Ok(user) => Ok((StatusCode::CREATED, Json(user))),
        Err(e) => {
            record_failure("registration", &e);
            Err(e)
        }
    }
}

/// Handle a password login.
///
/// POST /{realm}/auth/login
#[instrument(
    name = "sso.auth.login",
    skip_all,
    fields(grant_type = "password", realm = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, SsoError> {
    let start = Instant::now();
    tracing::Span::current().record("realm", realm.as_str());

    let email = payload.email.trim().to_lowercase();
    let result = state
        .user_auth
        .authenticate_user(&email, &payload.password, &realm)
        .await;

    let issued = observe_issuance("password", "login", start, result)?;
    session_response(&state, StatusCode::OK, &issued, None)
}

/// Handle a refresh-token rotation.
///
/// POST /{realm}/auth/refresh
///
/// Presenting a refresh token that is no longer the session's current one
/// destroys the session.
#[instrument(
    name = "sso.auth.refresh",
    skip_all,
    fields(grant_type = "refresh", realm = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_refresh(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Response, SsoError> {
    let start = Instant::now();
    tracing::Span::current().record("realm", realm.as_str());

    let result = state.user_auth.refresh(&payload.refresh_token, &realm).await;

    let issued = observe_issuance("refresh", "refresh", start, result)?;
    session_response(&state, StatusCode::OK, &issued, None)
}

/// Handle a move of the session to another realm of its group.
///
/// POST /{realm}/auth/switch-realm
#[instrument(
    name = "sso.auth.switch_realm",
    skip_all,
    fields(grant_type = "switch_realm", realm = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_switch_realm(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<SwitchRealmRequest>,
) -> Result<Response, SsoError> {
    let start = Instant::now();
    tracing::Span::current().record("realm", realm.as_str());

    let result = state
        .user_auth
        .switch_realm(&payload.refresh_token, &realm, &payload.target_realm)
        .await;

    let issued = observe_issuance("switch_realm", "switch_realm", start, result)?;
    session_response(&state, StatusCode::OK, &issued, None)
}

/// Handle a logout.
///
/// POST /{realm}/auth/logout
///
/// The body is optional; when it carries an access token, that token is
/// revoked as well.
#[instrument(name = "sso.auth.logout", skip_all, fields(realm = tracing::field::Empty))]
pub async fn handle_logout(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<Response, SsoError> {
    tracing::Span::current().record("realm", realm.as_str());

    let session_id = session_id_from(&headers);
    let payload = body.map(|Json(p)| p).unwrap_or_default();

    if let Err(e) = state
        .user_auth
        .logout(session_id.as_deref(), payload.access_token.as_ref(), &realm)
        .await
    {
        record_failure("logout", &e);
        return Err(e);
    }

    let cleared = state.session_cookie.clear()?;
    Ok((StatusCode::NO_CONTENT, [(SET_COOKIE, cleared)]).into_response())
}
