//! Session-aware token introspection.
//!
//! Checks run in order and stop at the first failure:
//!
//! 1. Signature. A token that cannot be authenticated is rejected outright;
//!    an authentic but malformed one is reported inactive.
//! 2. Expiry.
//! 3. Realm, when the caller names one. A token from another realm is
//!    rejected outright.
//! 4. Refresh tokens: the owning session must exist and still name this
//!    `jti`. A stale `jti` is a replay and destroys the session.
//! 5. Access tokens: the `jti` must not be on the revocation list.
//!
//! Cache failures surface as errors and never as an inactive result.

use crate::crypto::{CodecError, TokenCodec};
use crate::errors::{SsoError, INVALID_TOKEN_MESSAGE};
use crate::models::{
    IntrospectionResult, TokenClaims, TokenType, CAUSE_EXPIRED, CAUSE_MALFORMED, CAUSE_REVOKED,
};
use crate::observability::metrics::{record_introspection, record_refresh_replay};
use crate::repositories::{RevocationList, SessionStore};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct TokenValidator {
    codec: Arc<TokenCodec>,
    sessions: SessionStore,
    revocations: RevocationList,
}

fn cause_label(cause: &str) -> &'static str {
    match cause {
        CAUSE_EXPIRED => "expired",
        CAUSE_REVOKED => "revoked",
        CAUSE_MALFORMED => "malformed",
        _ => "other",
    }
}

fn inactive(cause: &str) -> IntrospectionResult {
    record_introspection("inactive", cause_label(cause));
    IntrospectionResult::inactive(cause)
}

fn rejected(reason: &str) -> SsoError {
    record_introspection("rejected", "none");
    SsoError::InvalidToken(reason.to_string())
}

impl TokenValidator {
    pub fn new(codec: Arc<TokenCodec>, sessions: SessionStore, revocations: RevocationList) -> Self {
        Self {
            codec,
            sessions,
            revocations,
        }
    }

    #[instrument(skip_all, name = "sso.validator.introspect", fields(expected_realm = ?expected_realm))]
    pub async fn introspect(
        &self,
        token: &str,
        expected_realm: Option<&str>,
    ) -> Result<IntrospectionResult, SsoError> {
        let claims = match self.codec.verify(token) {
            Ok(claims) => claims,
            Err(CodecError::InvalidSignature) => return Err(rejected(INVALID_TOKEN_MESSAGE)),
            Err(CodecError::Malformed(reason)) => {
                debug!(target: "sso.validator", reason = %reason, "Malformed token");
                return Ok(inactive(CAUSE_MALFORMED));
            }
            Err(CodecError::Expired) => return Ok(inactive(CAUSE_EXPIRED)),
        };

        if let Some(expected) = expected_realm {
            if claims.realm != expected {
                debug!(
                    target: "sso.validator",
                    token_realm = %claims.realm,
                    "Token presented to a foreign realm"
                );
                return Err(rejected(INVALID_TOKEN_MESSAGE));
            }
        }

        let revoked = match claims.token_type {
            TokenType::Refresh => !self.refresh_is_current(&claims).await?,
            TokenType::Access => self.revocations.is_revoked(&claims.jti).await?,
        };
        if revoked {
            return Ok(inactive(CAUSE_REVOKED));
        }

        record_introspection("active", "none");
        Ok(IntrospectionResult::active(claims))
    }

    /// Whether the refresh token is its session's current one. A stale
    /// token destroys the session.
    async fn refresh_is_current(&self, claims: &TokenClaims) -> Result<bool, SsoError> {
        let Some(session_id) = claims.session_id.as_deref() else {
            return Ok(false);
        };
        let Some(stored) = self.sessions.get(session_id).await? else {
            return Ok(false);
        };

        if stored.session.current_refresh_jti == claims.jti {
            return Ok(true);
        }

        warn!(
            target: "sso.validator",
            "Stale refresh token introspected, destroying session"
        );
        record_refresh_replay();
        self.sessions.destroy(session_id).await?;
        Ok(false)
    }

    /// Verify a refresh token presented to `realm` for rotation.
    ///
    /// Session checks are left to the rotation itself.
    #[instrument(skip_all, name = "sso.validator.refresh", fields(realm = %realm))]
    pub fn verify_refresh(&self, token: &str, realm: &str) -> Result<TokenClaims, SsoError> {
        let claims = self.verify_for_realm(token, realm)?;
        if claims.token_type != TokenType::Refresh {
            return Err(SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }
        Ok(claims)
    }

    /// Verify an access token presented to `realm`. `Ok(None)` if it has
    /// already expired.
    #[instrument(skip_all, name = "sso.validator.access", fields(realm = %realm))]
    pub fn verify_access(&self, token: &str, realm: &str) -> Result<Option<TokenClaims>, SsoError> {
        let claims = match self.verify_for_realm(token, realm) {
            Ok(claims) => claims,
            Err(SsoError::InvalidToken(reason)) if reason == CAUSE_EXPIRED => return Ok(None),
            Err(e) => return Err(e),
        };
        if claims.token_type != TokenType::Access {
            return Err(SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }
        Ok(Some(claims))
    }

    fn verify_for_realm(&self, token: &str, realm: &str) -> Result<TokenClaims, SsoError> {
        let claims = self.codec.verify(token).map_err(|e| match e {
            CodecError::InvalidSignature => {
                SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
            }
            CodecError::Malformed(_) => SsoError::InvalidToken(CAUSE_MALFORMED.to_string()),
            CodecError::Expired => SsoError::InvalidToken(CAUSE_EXPIRED.to_string()),
        })?;

        if claims.realm != realm {
            return Err(SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
        }
        Ok(claims)
    }
}
