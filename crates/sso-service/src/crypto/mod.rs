use crate::config::{Config, MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::errors::SsoError;
use crate::models::{TokenClaims, TokenType};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::{
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair},
};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Maximum accepted token size in bytes (4KB).
///
/// Checked before any decoding so oversized input costs nothing to reject.
pub const MAX_JWT_SIZE_BYTES: usize = 4096;

/// Bytes of entropy in session ids, federation states and PKCE verifiers.
const OPAQUE_TOKEN_BYTES: usize = 32;

/// Verification failure reported by [`TokenCodec::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The token could not be authenticated: oversized, unparseable, wrong
    /// algorithm or bad signature.
    #[error("token signature is invalid")]
    InvalidSignature,

    /// Authentic but missing or mistyped claims.
    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("token has expired")]
    Expired,
}

/// Signs and verifies EdDSA (Ed25519) JWTs with a single process-wide key.
///
/// Immutable after construction and shared through `Arc`.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    issuer: String,
    clock_skew_seconds: i64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("encoding_key", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .field("issuer", &self.issuer)
            .field("clock_skew_seconds", &self.clock_skew_seconds)
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec from a PKCS#8 (v1 or v2) Ed25519 private key.
    ///
    /// Fails with `KeyUnavailable` if the key cannot be parsed.
    pub fn from_pkcs8(
        private_key_pkcs8: &[u8],
        key_id: &str,
        issuer: &str,
        clock_skew_seconds: i64,
    ) -> Result<Self, SsoError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(private_key_pkcs8)
            .map_err(|e| SsoError::KeyUnavailable(format!("Invalid private key format: {}", e)))?;

        Ok(Self {
            encoding_key: EncodingKey::from_ed_der(private_key_pkcs8),
            decoding_key: DecodingKey::from_ed_der(key_pair.public_key().as_ref()),
            key_id: key_id.to_string(),
            issuer: issuer.to_string(),
            clock_skew_seconds,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SsoError> {
        let pkcs8 = STANDARD
            .decode(config.signing_key.expose_secret())
            .map_err(|e| SsoError::KeyUnavailable(format!("Invalid key encoding: {}", e)))?;

        Self::from_pkcs8(
            &pkcs8,
            &config.signing_key_id,
            &config.issuer,
            config.jwt_clock_skew_seconds,
        )
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Seconds past `exp` during which [`TokenCodec::verify`] still accepts
    /// a token.
    pub fn clock_skew_seconds(&self) -> i64 {
        self.clock_skew_seconds
    }

    /// Sign a claim set. The header carries `alg=EdDSA` and the key id.
    #[instrument(skip_all)]
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, SsoError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.key_id.clone());

        encode(&header, claims, &self.encoding_key)
            .map_err(|e| SsoError::KeyUnavailable(format!("JWT signing operation failed: {}", e)))
    }

    /// Verify a token and return its claims.
    ///
    /// Checks run in this order: size, signature, expiry (with the configured
    /// leeway), then claim structure. A token that is both expired and
    /// structurally broken reports `Expired` as long as `exp` is readable.
    #[instrument(skip_all)]
    pub fn verify(&self, token: &str) -> Result<TokenClaims, CodecError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "sso.crypto",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(CodecError::InvalidSignature);
        }

        // Expiry and required claims are checked below so each failure can
        // be classified separately.
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let token_data = decode::<Map<String, Value>>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "sso.crypto", error = %e, "Token verification failed");
                CodecError::InvalidSignature
            })?;
        let raw_claims = token_data.claims;

        let exp = raw_claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| CodecError::Malformed("missing or non-integer exp".to_string()))?;

        let now = chrono::Utc::now().timestamp();
        if now >= exp.saturating_add(self.clock_skew_seconds) {
            return Err(CodecError::Expired);
        }

        let claims: TokenClaims = serde_json::from_value(Value::Object(raw_claims))
            .map_err(|e| CodecError::Malformed(format!("invalid claim set: {}", e)))?;

        if claims.iss != self.issuer {
            return Err(CodecError::Malformed("unexpected issuer".to_string()));
        }
        if claims.token_type == TokenType::Refresh && claims.session_id.is_none() {
            return Err(CodecError::Malformed(
                "refresh token without session_id".to_string(),
            ));
        }

        Ok(claims)
    }
}

/// Hash a secret with bcrypt.
///
/// # Errors
///
/// Returns `SsoError::Crypto` if the cost is outside 10-14 or hashing fails.
#[instrument(skip_all)]
pub fn hash_secret(secret: &str, cost: u32) -> Result<String, SsoError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(SsoError::Crypto(format!(
            "Invalid bcrypt cost: {} (must be {}-{})",
            cost, MIN_BCRYPT_COST, MAX_BCRYPT_COST
        )));
    }

    bcrypt::hash(secret, cost).map_err(|e| SsoError::Crypto(format!("Hashing failed: {}", e)))
}

/// Verify a secret against a bcrypt hash
#[instrument(skip_all)]
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool, SsoError> {
    bcrypt::verify(secret, hash)
        .map_err(|e| SsoError::Crypto(format!("Secret verification failed: {}", e)))
}

/// [`verify_secret`] on the blocking pool, so a bcrypt round does not stall
/// the async workers.
pub async fn verify_secret_off_thread(secret: String, hash: String) -> Result<bool, SsoError> {
    tokio::task::spawn_blocking(move || verify_secret(&secret, &hash))
        .await
        .map_err(|e| SsoError::Internal(format!("Secret verification task failed: {}", e)))?
}

/// [`hash_secret`] on the blocking pool.
pub async fn hash_secret_off_thread(secret: String, cost: u32) -> Result<String, SsoError> {
    tokio::task::spawn_blocking(move || hash_secret(&secret, cost))
        .await
        .map_err(|e| SsoError::Internal(format!("Secret hashing task failed: {}", e)))?
}

/// Hash of a random throwaway secret, verified against when the real
/// principal does not exist so both paths pay the same bcrypt cost.
pub fn dummy_hash(cost: u32) -> Result<String, SsoError> {
    let throwaway = generate_opaque_token()?;
    hash_secret(&throwaway, cost)
}

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, SsoError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| SsoError::Crypto(format!("Random bytes generation failed: {}", e)))?;
    Ok(bytes)
}

/// 256 random bits, base64url without padding (43 chars).
///
/// Used for session ids, federation states and PKCE verifiers.
pub fn generate_opaque_token() -> Result<String, SsoError> {
    Ok(URL_SAFE_NO_PAD.encode(generate_random_bytes(OPAQUE_TOKEN_BYTES)?))
}

/// Fresh token identifier (UUIDv4, 122 random bits).
pub fn generate_jti() -> String {
    Uuid::new_v4().to_string()
}

/// PKCE verifier and its S256 challenge (RFC 7636).
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkcePair {
    pub fn generate() -> Result<Self, SsoError> {
        let verifier = generate_opaque_token()?;
        let challenge = pkce_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }
}

/// `BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
