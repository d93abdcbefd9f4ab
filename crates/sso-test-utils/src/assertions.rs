//! Custom test assertions for expressive tests
//!
//! The helpers only decode; signature checks belong to the service's own
//! introspection endpoint.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Claims carried by every token the service issues.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedClaims {
    pub sub: String,
    pub iss: String,
    pub realm: String,
    pub token_type: String,
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT is missing segment {}", index));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {}", index, e))
}

/// Decode a token's claims without verifying its signature.
pub fn decode_claims(token: &str) -> DecodedClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_in_realm("edu")
///     .assert_has_scope("api:read");
/// ```
pub trait TokenAssertions {
    /// Three segments, EdDSA header, full claim set.
    fn assert_valid_jwt(&self) -> &Self;

    fn assert_has_scope(&self, scope: &str) -> &Self;

    fn assert_in_realm(&self, realm: &str) -> &Self;

    /// `access` or `refresh`.
    fn assert_token_type(&self, token_type: &str) -> &Self;

    fn assert_for_subject(&self, subject: &str) -> &Self;

    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// `exp - iat` equals `seconds`.
    fn assert_lifetime(&self, seconds: i64) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header: JwtHeader =
            serde_json::from_slice(&segment(self, 0)).expect("Failed to parse JWT header JSON");
        assert_eq!(header.alg, "EdDSA", "Expected EdDSA algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");
        assert!(header.kid.is_some(), "JWT header must carry a kid");

        decode_claims(self);
        self
    }

    fn assert_has_scope(&self, scope: &str) -> &Self {
        let claims = decode_claims(self);
        assert!(
            claims.scope.split_whitespace().any(|s| s == scope),
            "Token does not contain scope '{}'. Available scopes: {}",
            scope,
            claims.scope
        );
        self
    }

    fn assert_in_realm(&self, realm: &str) -> &Self {
        let claims = decode_claims(self);
        assert_eq!(
            claims.realm, realm,
            "Expected realm '{}', got '{}'",
            realm, claims.realm
        );
        self
    }

    fn assert_token_type(&self, token_type: &str) -> &Self {
        let claims = decode_claims(self);
        assert_eq!(
            claims.token_type, token_type,
            "Expected token_type '{}', got '{}'",
            token_type, claims.token_type
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = decode_claims(self);
        assert_eq!(
            claims.sub, subject,
            "Expected subject '{}', got '{}'",
            subject, claims.sub
        );
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header: JwtHeader =
            serde_json::from_slice(&segment(self, 0)).expect("Failed to parse JWT header");
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.kid
        );
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = decode_claims(self);
        assert_eq!(
            claims.exp - claims.iat,
            seconds,
            "Expected a {}s lifetime, got {}s",
            seconds,
            claims.exp - claims.iat
        );
        self
    }
}
