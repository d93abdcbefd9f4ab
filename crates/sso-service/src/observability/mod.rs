//! Observability for the SSO service
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe fields.
//! Fields are categorized as:
//! - **SAFE**: Can be logged in plaintext (realm, provider, grant type, outcome)
//! - **HASHED**: SHA-256 hashed for correlation (client_id, user_id)
//! - **NEVER**: Must never appear in logs (secrets, tokens, session ids, codes, emails)

pub mod metrics;

use crate::errors::SsoError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// This is a one-way correlation aid, not a secret-protection primitive.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}

/// Error categories for metrics labels (bounded cardinality)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or unsupported requests
    Request,
    /// Bad credentials, bad federation state, provider rejection
    Authentication,
    /// Scope and realm-group violations
    Authorization,
    /// Forged or unreadable tokens, key problems
    Cryptographic,
    /// Cache or provider outages
    Unavailable,
    /// Database, conflicts and everything else
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Request => "request",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Cryptographic => "cryptographic",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&SsoError> for ErrorCategory {
    fn from(err: &SsoError) -> Self {
        match err {
            SsoError::UnsupportedGrantType(_) | SsoError::BadRequest(_) | SsoError::NotFound(_) => {
                ErrorCategory::Request
            }
            SsoError::InvalidCredentials
            | SsoError::InvalidState
            | SsoError::ProviderRejected(_) => ErrorCategory::Authentication,
            SsoError::InsufficientScope { .. } | SsoError::Forbidden(_) => {
                ErrorCategory::Authorization
            }
            SsoError::InvalidToken(_) | SsoError::KeyUnavailable(_) | SsoError::Crypto(_) => {
                ErrorCategory::Cryptographic
            }
            SsoError::ServiceUnavailable(_) => ErrorCategory::Unavailable,
            SsoError::IdentityConflict(_) | SsoError::Database(_) | SsoError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

/// Record a failed operation under its error category.
pub fn record_failure(operation: &str, err: &SsoError) {
    self::metrics::record_error(
        operation,
        ErrorCategory::from(err).as_str(),
        err.status_code().as_u16(),
    );
}
