//! HTTP request handlers for the SSO service.

pub mod auth_handler;
pub mod federation_handler;
pub mod health;
pub mod oauth_handler;
pub mod session_cookie;

pub use auth_handler::{
    handle_login, handle_logout, handle_refresh, handle_sign_up, handle_switch_realm,
};
pub use federation_handler::{handle_authentication, handle_link, handle_registration};
pub use health::{health_check, metrics_handler};
pub use oauth_handler::{handle_introspect, handle_token};

use crate::errors::SsoError;
use crate::models::{IssuedTokens, TokenPairResponse};
use crate::observability::{metrics::record_token_issuance, record_failure};
use std::time::Instant;

pub(crate) const BEARER: &str = "Bearer";

/// Record the issuance outcome on the current span and in metrics.
pub(crate) fn observe_issuance<T>(
    grant_type: &'static str,
    operation: &'static str,
    start: Instant,
    result: Result<T, SsoError>,
) -> Result<T, SsoError> {
    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
    record_token_issuance(grant_type, status, start.elapsed());

    if let Err(e) = &result {
        record_failure(operation, e);
    }
    result
}

/// Pair body for a session-backed issuance.
pub(crate) fn pair_response(
    issued: &IssuedTokens,
    redirect_target: Option<String>,
) -> Result<TokenPairResponse, SsoError> {
    let refresh_token = issued
        .refresh_token
        .clone()
        .ok_or_else(|| SsoError::Internal("session issuance without refresh token".to_string()))?;

    Ok(TokenPairResponse {
        access_token: issued.access_token.clone(),
        refresh_token,
        token_type: BEARER.to_string(),
        expires_at: issued.expires_at,
        redirect_target,
    })
}
