//! Metrics definitions for the SSO service
//!
//! All metrics follow Prometheus naming conventions:
//! - `sso_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `grant_type`: client_credentials, password, refresh, switch_realm, federation
//! - `status`: success, error
//! - `result`: active, inactive, rejected
//! - `cause`: expired, revoked, malformed, none
//! - `provider`: vk, yandex
//! - `operation`: bounded by the cache trait and the store queries
//! - `table`: users, user_identities, client_applications
//! - `path`: normalized to a fixed route table, realm replaced by `{realm}`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder and return the handle that
/// renders `/metrics`.
///
/// # Errors
///
/// Fails if bucket configuration is rejected or a recorder is already
/// installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sso_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // bcrypt dominates issuance latency at the configured cost
        .set_buckets_for_metric(
            Matcher::Prefix("sso_token_issuance".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.300, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sso_cache_operation".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500],
        )
        .map_err(|e| format!("Failed to set cache operation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sso_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `sso_token_issuance_duration_seconds`, `sso_token_issuance_total`
/// Labels: `grant_type`, `status`
pub fn record_token_issuance(grant_type: &str, status: &str, duration: Duration) {
    histogram!("sso_token_issuance_duration_seconds", "grant_type" => grant_type.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("sso_token_issuance_total", "grant_type" => grant_type.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record an introspection outcome
///
/// Metric: `sso_token_introspections_total`
/// Labels: `result`, `cause`
pub fn record_introspection(result: &str, cause: &str) {
    counter!("sso_token_introspections_total", "result" => result.to_string(), "cause" => cause.to_string())
        .increment(1);
}

/// Record a detected refresh-token replay (session destroyed)
///
/// Metric: `sso_refresh_replays_total`
pub fn record_refresh_replay() {
    counter!("sso_refresh_replays_total").increment(1);
}

// ============================================================================
// Federation Metrics
// ============================================================================

/// Record a federation completion attempt
///
/// Metric: `sso_federation_completions_total`
/// Labels: `provider`, `mode`, `status`
pub fn record_federation_completion(provider: &str, mode: &str, status: &str) {
    counter!("sso_federation_completions_total",
        "provider" => provider.to_string(),
        "mode" => mode.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Cache Metrics
// ============================================================================

/// Record a cache operation
///
/// Metric: `sso_cache_operation_duration_seconds`, `sso_cache_operations_total`
/// Labels: `operation`, `status` (success, error, timeout)
pub fn record_cache_operation(operation: &str, status: &str, duration: Duration) {
    histogram!("sso_cache_operation_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());

    counter!("sso_cache_operations_total", "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record a user/client store query
///
/// Metric: `sso_db_query_duration_seconds`, `sso_db_queries_total`
/// Labels: `operation`, `table`, `status`
pub fn record_db_query(operation: &str, table: &str, status: &str, duration: Duration) {
    histogram!("sso_db_query_duration_seconds", "operation" => operation.to_string(), "table" => table.to_string())
        .record(duration.as_secs_f64());

    counter!("sso_db_queries_total",
        "operation" => operation.to_string(),
        "table" => table.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record error by category
///
/// Metric: `sso_errors_total`
/// Labels: `operation`, `error_category`, `status_code`
pub fn record_error(operation: &str, error_category: &str, status_code: u16) {
    counter!("sso_errors_total",
        "operation" => operation.to_string(),
        "error_category" => error_category.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `sso_http_requests_total`, `sso_http_request_duration_seconds`
/// Labels: `method`, `path`, `status_code`
///
/// Captures every response, including framework-level rejections
/// (415, 400 on JSON errors, 404, 405).
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let normalized_path = normalize_path(path);

    histogram!("sso_http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => normalized_path.clone(),
        "status_code" => status_code.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sso_http_requests_total",
        "method" => method.to_string(),
        "path" => normalized_path,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

const REALM_ROUTES: &[&str] = &[
    "registration",
    "oauth/token",
    "oauth/introspect",
    "auth/login",
    "auth/refresh",
    "auth/logout",
    "auth/switch-realm",
];

const PROVIDERS: &[&str] = &["vk", "yandex"];
const PROVIDER_ACTIONS: &[&str] = &["link", "registration", "authentication"];

/// Normalize path to prevent label cardinality explosion
///
/// The leading realm segment becomes `{realm}`; anything outside the route
/// table becomes `/other`.
fn normalize_path(path: &str) -> String {
    match path {
        "/health" | "/metrics" => return path.to_string(),
        _ => {}
    }

    let Some((realm, rest)) = path.trim_start_matches('/').split_once('/') else {
        return "/other".to_string();
    };
    if realm.is_empty() {
        return "/other".to_string();
    }

    if REALM_ROUTES.contains(&rest) {
        return format!("/{{realm}}/{rest}");
    }

    if let Some((provider, action)) = rest.split_once('/') {
        if PROVIDERS.contains(&provider) && PROVIDER_ACTIONS.contains(&action) {
            return format!("/{{realm}}/{provider}/{action}");
        }
    }

    "/other".to_string()
}
