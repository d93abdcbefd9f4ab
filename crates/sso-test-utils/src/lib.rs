//! # SSO Test Utilities
//!
//! Shared test utilities for the SSO service.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed Ed25519 keys)
//! - Server test harness (`TestSsoServer` for E2E tests)
//! - Custom assertions (`TokenAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sso_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestSsoServer::spawn().await?;
//!     server.register_client("edu", "c1", "s1", &["api:read"]).await?;
//!
//!     let token: String = /* POST {server.url()}/edu/oauth/token */;
//!     token.assert_valid_jwt().assert_in_realm("edu");
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod server_harness;

pub use assertions::*;
pub use crypto_fixtures::*;
pub use server_harness::*;
