//! Operational endpoints.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// Liveness probe. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Prometheus text exposition of every recorded metric.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn test_health_check_returns_ok() {
        assert_eq!(health_check().await, "OK");
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_recorded_counter() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("sso_refresh_replays_total").increment(3);
        });

        let body = metrics_handler(State(handle)).await;
        assert!(body.contains("sso_refresh_replays_total 3"));
    }
}
