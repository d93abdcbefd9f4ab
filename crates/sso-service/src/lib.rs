//! SSO Service Library
//!
//! Token and session lifecycle engine for a multi-realm single sign-on
//! identity provider.
//!
//! # Modules
//!
//! - `cache` - Shared key-value cache (Redis, in-memory)
//! - `config` - Service configuration
//! - `crypto` - Token signing, secret hashing, PKCE
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP middleware
//! - `models` - Data models and wire bodies
//! - `observability` - Metrics and log correlation helpers
//! - `providers` - External identity providers (VK ID, Yandex ID)
//! - `repositories` - Cache-backed state and durable stores
//! - `routes` - Router and application state
//! - `services` - Issuance, validation, grants and login flows

pub mod cache;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod providers;
pub mod repositories;
pub mod routes;
pub mod services;
