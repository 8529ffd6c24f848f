//! Prometheus scrape endpoint

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use super::recorder::MetricsRegistry;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render every series of the registry in the Prometheus text format
pub async fn metrics_endpoint(State(registry): State<MetricsRegistry>) -> Response {
    let body = registry.render();
    tracing::debug!(bytes = body.len(), "Serving metrics");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Router for the dedicated metrics listener
pub fn metrics_router(registry: MetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_endpoint))
        .with_state(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::recorder::RegistryLabels;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_router_serves_text_format() {
        let registry = MetricsRegistry::new(&RegistryLabels::default()).unwrap();
        registry.set_cpu_usage(33.0);

        let response = metrics_router(registry)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("app_cpu_usage_percent"));
    }
}
