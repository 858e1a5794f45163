//! Pull endpoint for Prometheus scraping.

use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use super::registry::MetricsRegistry;

/// Axum handler serving the current exposition snapshot.
///
/// Cheap (one pass over the instruments) and infallible: an unavailable
/// registry yields an empty body, never an error response.
pub async fn metrics_endpoint(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    let body = registry.snapshot();
    tracing::debug!(bytes = body.len(), "metrics snapshot served");
    (
        [(header::CONTENT_TYPE, registry.content_type())],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservabilityConfig;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn metrics_router(registry: Arc<MetricsRegistry>) -> Router {
        Router::new()
            .route("/metrics", get(metrics_endpoint))
            .with_state(registry)
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_exposition() {
        let registry = Arc::new(MetricsRegistry::new(&ObservabilityConfig::default()));
        registry.record_cache_operation("default", "get", "miss");

        let response = metrics_router(registry)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cache_operations_total"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_with_disabled_registry() {
        let config = ObservabilityConfig {
            metrics_enabled: false,
            ..ObservabilityConfig::default()
        };
        let registry = Arc::new(MetricsRegistry::new(&config));

        let response = metrics_router(registry)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }
}
