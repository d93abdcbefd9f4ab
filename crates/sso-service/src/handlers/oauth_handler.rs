//! OAuth 2.0 endpoints: client-credentials grant and token introspection.

use crate::errors::SsoError;
use crate::handlers::{observe_issuance, BEARER};
use crate::models::{IntrospectRequest, IntrospectionResult, TokenRequest, TokenResponse};
use crate::observability::record_failure;
use crate::routes::AppState;
use crate::services::client_credentials::CLIENT_CREDENTIALS_GRANT;
use axum::{
    extract::{Path, State},
    Json,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Handle a client-credentials token request.
///
/// POST /{realm}/oauth/token
///
/// Returns an access token only. No session, no refresh token.
#[instrument(
    name = "sso.oauth.token",
    skip_all,
    fields(grant_type = CLIENT_CREDENTIALS_GRANT, realm = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, SsoError> {
    let start = Instant::now();
    tracing::Span::current().record("realm", realm.as_str());

    let result = state
        .client_grant
        .authenticate_client(
            &payload.grant_type,
            &payload.client_id,
            &payload.client_secret,
            &realm,
            payload.scope.as_deref(),
        )
        .await;

    let issued = observe_issuance(CLIENT_CREDENTIALS_GRANT, "client_credentials", start, result)?;

    Ok(Json(TokenResponse {
        access_token: issued.access_token,
        token_type: BEARER.to_string(),
        expires_at: issued.expires_at,
    }))
}

/// Handle a token introspection request.
///
/// POST /{realm}/oauth/introspect
///
/// Expired, revoked and malformed tokens return 200 with `active: false`.
/// Forged tokens and tokens from another realm return 401.
#[instrument(
    name = "sso.oauth.introspect",
    skip_all,
    fields(realm = tracing::field::Empty)
)]
pub async fn handle_introspect(
    State(state): State<Arc<AppState>>,
    Path(realm): Path<String>,
    Json(payload): Json<IntrospectRequest>,
) -> Result<Json<IntrospectionResult>, SsoError> {
    tracing::Span::current().record("realm", realm.as_str());

    if !state.realm_groups.contains(&realm) {
        return Err(SsoError::NotFound("Realm".to_string()));
    }

    match state
        .validator
        .introspect(payload.token.expose_secret(), Some(&realm))
        .await
    {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            record_failure("introspect", &e);
            Err(e)
        }
    }
}
