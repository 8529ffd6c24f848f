//! Correlation middleware for HTTP requests
//!
//! Continues any trace propagated in the request headers, opens a server span
//! for the request and attaches a [`CorrelationContext`] to the request
//! extensions. Handlers receive it through the `CorrelationContext`
//! extractor.
//!
//! The rest of the request runs inside an `http_request` tracing span whose
//! OpenTelemetry parent is the server span, so plain `tracing` events from
//! handlers and layers land in the same trace.

use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use opentelemetry::KeyValue;
use opentelemetry::trace::SpanKind;
use tokio::time::Instant;
use tracing::{Instrument, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::observability::context::CorrelationContext;
use crate::observability::tracing::extract_trace_context;

/// State for [`correlation_middleware`]
#[derive(Debug, Clone)]
pub struct CorrelationLayerState {
    /// Context every request context derives from; holds logger and tracer
    pub base: CorrelationContext,
    /// Budget given to each request, stored as its deadline
    pub request_timeout: Duration,
}

impl CorrelationLayerState {
    pub fn new(base: CorrelationContext, request_timeout: Duration) -> Self {
        Self {
            base,
            request_timeout,
        }
    }
}

/// Middleware that derives a request-scoped correlation context
pub async fn correlation_middleware(
    State(state): State<CorrelationLayerState>,
    mut req: Request,
    next: Next,
) -> Response {
    let parent = extract_trace_context(req.headers());
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());

    let mut attributes = vec![
        KeyValue::new("http.request.method", method.clone()),
        KeyValue::new("url.path", req.uri().path().to_string()),
    ];
    if let Some(route) = &route {
        attributes.push(KeyValue::new("http.route", route.clone()));
    }

    let name = match &route {
        Some(route) => format!("{} {}", method, route),
        None => format!("HTTP {}", method),
    };

    let cx = state
        .base
        .with_parent(parent)
        .with_deadline(Instant::now() + state.request_timeout)
        .start_span_with_kind(name, SpanKind::Server, attributes);

    let span = info_span!(
        "http_request",
        method = %method,
        path = %req.uri().path(),
        trace_id = %cx.trace_id().unwrap_or_default()
    );
    span.set_parent(cx.otel_context().clone());

    req.extensions_mut().insert(cx.clone());
    let response = next.run(req).instrument(span).await;

    let status = response.status();
    cx.set_attribute(KeyValue::new(
        "http.response.status_code",
        i64::from(status.as_u16()),
    ));
    if status.is_server_error() {
        cx.set_error_status(format!("HTTP {}", status.as_u16()));
    }
    cx.end_span();

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::context::Logger;
    use crate::observability::context::tests::test_tracer;
    use crate::observability::tracing::install_propagator;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::ServiceExt;
    use tracing_test::traced_test;

    async fn echo_ids(cx: CorrelationContext) -> String {
        format!(
            "{}|{}|{}|{}",
            cx.trace_id().unwrap_or_default(),
            cx.span_id().unwrap_or_default(),
            cx.logger().component(),
            cx.remaining().is_some()
        )
    }

    fn app(base: CorrelationContext) -> Router {
        Router::new()
            .route("/ids", get(echo_ids))
            .route(
                "/log",
                get(|| async {
                    tracing::info!("handler reached");
                    "ok"
                }),
            )
            .layer(from_fn_with_state(
                CorrelationLayerState::new(base, Duration::from_secs(5)),
                correlation_middleware,
            ))
    }

    async fn body_of(app: Router, request: Request<Body>) -> String {
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_incoming_trace_is_continued() {
        install_propagator();
        let base = CorrelationContext::new()
            .with_logger(Logger::new("api"))
            .with_tracer(test_tracer());

        let request = Request::builder()
            .uri("/ids")
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .body(Body::empty())
            .unwrap();

        let body = body_of(app(base), request).await;
        let parts: Vec<&str> = body.split('|').collect();

        assert_eq!(parts[0], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(parts[1].len(), 16);
        assert_ne!(parts[1], "00f067aa0ba902b7");
        assert_eq!(parts[2], "api");
        assert_eq!(parts[3], "true");
    }

    #[tokio::test]
    async fn test_new_trace_started_without_headers() {
        install_propagator();
        let base = CorrelationContext::new()
            .with_logger(Logger::new("api"))
            .with_tracer(test_tracer());

        let request = Request::builder().uri("/ids").body(Body::empty()).unwrap();
        let body = body_of(app(base), request).await;
        let parts: Vec<&str> = body.split('|').collect();

        assert_eq!(parts[0].len(), 32);
        assert_eq!(parts[1].len(), 16);
    }

    #[tokio::test]
    async fn test_noop_tracer_adds_no_ids() {
        install_propagator();

        let request = Request::builder().uri("/ids").body(Body::empty()).unwrap();
        let body = body_of(app(CorrelationContext::new()), request).await;

        assert_eq!(body, "|||true");
    }

    #[traced_test]
    #[tokio::test]
    async fn test_handler_events_run_inside_request_span() {
        install_propagator();
        let base = CorrelationContext::new()
            .with_logger(Logger::new("api"))
            .with_tracer(test_tracer());

        let request = Request::builder()
            .uri("/log")
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .body(Body::empty())
            .unwrap();
        body_of(app(base), request).await;

        assert!(logs_contain("handler reached"));
        assert!(logs_contain("http_request{"));
        assert!(logs_contain("trace_id=4bf92f3577b34da6a3ce929d0e0e4736"));
    }
}
