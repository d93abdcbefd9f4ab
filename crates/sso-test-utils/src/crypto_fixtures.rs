//! Deterministic cryptographic fixtures for testing
//!
//! The same seed always yields the same Ed25519 signing key, so tokens
//! minted by two harness instances with the same seed verify against each
//! other and tokens from different seeds do not.

use base64::engine::general_purpose;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Ed25519 signing key for tests.
pub struct TestSigningKey {
    /// PKCS#8 v1 DER document.
    pub pkcs8: Vec<u8>,
    /// Raw 32-byte public key.
    pub public_key: Vec<u8>,
}

impl TestSigningKey {
    /// PKCS#8 document in the base64 form `SSO_SIGNING_KEY` expects.
    pub fn pkcs8_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.pkcs8)
    }
}

/// Generate a deterministic Ed25519 signing key.
///
/// # Example
/// ```rust,ignore
/// let key = test_signing_key(1)?;
/// assert_eq!(key.pkcs8, test_signing_key(1)?.pkcs8);
/// ```
pub fn test_signing_key(seed: u8) -> Result<TestSigningKey, FixtureError> {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    Ok(TestSigningKey {
        pkcs8: build_pkcs8_from_seed(&seed_bytes),
        public_key: key_pair.public_key().as_ref().to_vec(),
    })
}

/// PKCS#8 v1 document (RFC 5208) wrapping a raw Ed25519 seed.
///
/// Test-only. Production keys come from `Ed25519KeyPair::generate_pkcs8`.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
