use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message shared by every credential failure so callers cannot tell which
/// check failed.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials";

/// Message shared by every token authentication failure.
pub const INVALID_TOKEN_MESSAGE: &str = "The token is invalid";

pub const INVALID_STATE_MESSAGE: &str = "Invalid or expired state";

#[derive(Debug, Error)]
pub enum SsoError {
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid or expired federation state")]
    InvalidState,

    #[error("Identity provider rejected the exchange: {0}")]
    ProviderRejected(String),

    #[error("Insufficient scope: requested {requested:?}, allowed {allowed:?}")]
    InsufficientScope {
        requested: Vec<String>,
        allowed: Vec<String>,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl SsoError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SsoError::UnsupportedGrantType(_) | SsoError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SsoError::InvalidCredentials
            | SsoError::InvalidToken(_)
            | SsoError::InvalidState
            | SsoError::ProviderRejected(_) => StatusCode::UNAUTHORIZED,
            SsoError::InsufficientScope { .. } | SsoError::Forbidden(_) => StatusCode::FORBIDDEN,
            SsoError::NotFound(_) => StatusCode::NOT_FOUND,
            SsoError::IdentityConflict(_) => StatusCode::CONFLICT,
            SsoError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SsoError::KeyUnavailable(_)
            | SsoError::Database(_)
            | SsoError::Crypto(_)
            | SsoError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            SsoError::UnsupportedGrantType(_) => "UNSUPPORTED_GRANT_TYPE",
            SsoError::BadRequest(_) => "BAD_REQUEST",
            SsoError::InvalidCredentials => "INVALID_CREDENTIALS",
            SsoError::InvalidToken(_) => "INVALID_TOKEN",
            SsoError::InvalidState => "INVALID_STATE",
            SsoError::ProviderRejected(_) => "PROVIDER_REJECTED",
            SsoError::InsufficientScope { .. } => "INSUFFICIENT_SCOPE",
            SsoError::Forbidden(_) => "FORBIDDEN",
            SsoError::NotFound(_) => "NOT_FOUND",
            SsoError::IdentityConflict(_) => "IDENTITY_CONFLICT",
            SsoError::KeyUnavailable(_) => "KEY_UNAVAILABLE",
            SsoError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            SsoError::Database(_) => "DATABASE_ERROR",
            SsoError::Crypto(_) => "CRYPTO_ERROR",
            SsoError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            SsoError::UnsupportedGrantType(grant) => {
                format!("Unsupported grant type: {grant}")
            }
            SsoError::BadRequest(reason) => reason.clone(),
            SsoError::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE.to_string(),
            SsoError::InvalidToken(reason) => reason.clone(),
            SsoError::InvalidState => INVALID_STATE_MESSAGE.to_string(),
            SsoError::ProviderRejected(_) => {
                "The identity provider rejected the authorization code".to_string()
            }
            SsoError::InsufficientScope { .. } => {
                "Requested scope exceeds the client's allowed scope".to_string()
            }
            SsoError::Forbidden(reason) => reason.clone(),
            SsoError::NotFound(what) => format!("{what} not found"),
            SsoError::IdentityConflict(reason) => reason.clone(),
            SsoError::KeyUnavailable(_) => "Token signing is unavailable".to_string(),
            SsoError::ServiceUnavailable(_) => {
                "Service temporarily unavailable. Please try again.".to_string()
            }
            SsoError::Database(_) => "An internal database error occurred".to_string(),
            SsoError::Crypto(_) => "An internal cryptographic error occurred".to_string(),
            SsoError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for SsoError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(target: "sso.errors", code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(target: "sso.errors", code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for SsoError {
    fn from(err: sqlx::Error) -> Self {
        SsoError::Database(err.to_string())
    }
}
