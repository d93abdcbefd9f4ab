//! Federated login through VK ID and Yandex ID.

use crate::errors::SsoError;
use crate::handlers::{auth_handler::session_response, observe_issuance};
use crate::models::{FederationCompletionRequest, LinkQuery, LinkResponse, ProviderKind};
use crate::observability::record_failure;
use crate::routes::AppState;
use crate::services::CompletionMode;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

fn parse_provider(raw: &str) -> Result<ProviderKind, SsoError> {
    raw.parse()
        .map_err(|_| SsoError::NotFound("Identity provider".to_string()))
}

/// Start a provider handshake.
///
/// GET /{realm}/{provider}/link?redirect_target=
#[instrument(
    name = "sso.federation.link",
    skip_all,
    fields(realm = tracing::field::Empty, provider = tracing::field::Empty)
)]
pub async fn handle_link(
    State(state): State<Arc<AppState>>,
    Path((realm, provider)): Path<(String, String)>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<LinkResponse>, SsoError> {
    let span = tracing::Span::current();
    span.record("realm", realm.as_str());
    span.record("provider", provider.as_str());

    let result = match parse_provider(&provider) {
        Ok(kind) => {
            state
                .federation
                .start_link(&realm, kind, query.redirect_target)
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(link) => Ok(Json(link)),
        Err(e) => {
            record_failure("federation_link", &e);
            Err(e)
        }
    }
}

/// Complete a handshake, creating and linking a user if none is linked yet.
///
/// POST /{realm}/{provider}/registration
#[instrument(
    name = "sso.federation.registration",
    skip_all,
    fields(grant_type = "federation", realm = tracing::field::Empty, provider = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_registration(
    State(state): State<Arc<AppState>>,
    Path((realm, provider)): Path<(String, String)>,
    Json(payload): Json<FederationCompletionRequest>,
) -> Result<Response, SsoError> {
    complete(
        &state,
        &realm,
        &provider,
        payload,
        CompletionMode::Registration,
    )
    .await
}

/// Complete a handshake for an already linked user.
///
/// POST /{realm}/{provider}/authentication
#[instrument(
    name = "sso.federation.authentication",
    skip_all,
    fields(grant_type = "federation", realm = tracing::field::Empty, provider = tracing::field::Empty, status = tracing::field::Empty)
)]
pub async fn handle_authentication(
    State(state): State<Arc<AppState>>,
    Path((realm, provider)): Path<(String, String)>,
    Json(payload): Json<FederationCompletionRequest>,
) -> Result<Response, SsoError> {
    complete(
        &state,
        &realm,
        &provider,
        payload,
        CompletionMode::Authentication,
    )
    .await
}

async fn complete(
    state: &AppState,
    realm: &str,
    provider: &str,
    payload: FederationCompletionRequest,
    mode: CompletionMode,
) -> Result<Response, SsoError> {
    let start = Instant::now();
    let span = tracing::Span::current();
    span.record("realm", realm);
    span.record("provider", provider);

    let result = match parse_provider(provider) {
        Ok(kind) => {
            state
                .federation
                .complete_link(
                    &payload.state,
                    payload.code.expose_secret(),
                    realm,
                    kind,
                    payload.device_id.as_deref(),
                    mode,
                )
                .await
        }
        Err(e) => Err(e),
    };

    let outcome = observe_issuance("federation", mode.as_str(), start, result)?;

    let status = match mode {
        CompletionMode::Registration => StatusCode::CREATED,
        CompletionMode::Authentication => StatusCode::OK,
    };
    session_response(state, status, &outcome.tokens, outcome.redirect_target)
}
