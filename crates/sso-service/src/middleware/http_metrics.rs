//! HTTP metrics middleware
//!
//! Records every response, including rejections produced before a handler
//! runs:
//! - 415 Unsupported Media Type (wrong Content-Type)
//! - 400/422 on JSON body errors
//! - 404 Not Found
//! - 405 Method Not Allowed

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Records method, normalized path, status and duration for each request.
///
/// Applied as the outermost layer so timeouts and framework rejections are
/// counted too.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::post,
        Router,
    };
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;

    async fn handler_200() -> &'static str {
        "OK"
    }

    async fn handler_503() -> (StatusCode, &'static str) {
        (StatusCode::SERVICE_UNAVAILABLE, "Unavailable")
    }

    fn test_app() -> Router {
        Router::new()
            .route("/:realm/oauth/token", post(handler_200))
            .route("/:realm/auth/login", post(handler_503))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    async fn send(app: Router, method: &str, uri: &str) -> StatusCode {
        let request = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");
        app.oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_middleware_passes_responses_through() {
        assert_eq!(send(test_app(), "POST", "/edu/oauth/token").await, StatusCode::OK);
        assert_eq!(
            send(test_app(), "POST", "/edu/auth/login").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            send(test_app(), "GET", "/edu/oauth/token").await,
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(send(test_app(), "GET", "/nowhere").await, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_middleware_records_normalized_path() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                send(test_app(), "POST", "/edu/oauth/token").await;
                send(test_app(), "POST", "/admission/oauth/token").await;
            });
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counted = snapshot.into_iter().find_map(|(key, _, _, value)| {
            let key = key.key();
            let is_token_path = key
                .labels()
                .any(|l| l.key() == "path" && l.value() == "/{realm}/oauth/token");
            (key.name() == "sso_http_requests_total" && is_token_path).then_some(value)
        });
        assert_eq!(counted, Some(DebugValue::Counter(2)));
    }
}
