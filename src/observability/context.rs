//! Request-scoped correlation of logs and traces
//!
//! A [`CorrelationContext`] carries the logger and tracer for one unit of
//! work (an inbound request or a background task) together with the
//! OpenTelemetry context that holds the active span. It is immutable:
//! attaching a logger, tracer, span or deadline returns a new context and
//! leaves the original untouched.
//!
//! Logs emitted through [`CorrelationContext::logger`] carry `trace_id` and
//! `span_id` fields whenever a valid span is active, so log lines can be
//! joined with the trace that produced them.
//!
//! A context without a logger or tracer is still usable. It hands out a
//! no-op logger and a no-op tracer instead of failing.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use opentelemetry::trace::{
    SpanId, SpanKind, Status, TraceContextExt, TraceId, Tracer as OtelTracer,
};
use opentelemetry::{Context, KeyValue};
use tokio::time::Instant;

/// Emit one event with the correlation fields of `$logger`
macro_rules! correlated_event {
    ($logger:expr, $level:expr, $($rest:tt)+) => {
        if $logger.enabled {
            tracing::event!(
                $level,
                component = %$logger.component,
                trace_id = $logger.trace_id.as_deref(),
                span_id = $logger.span_id.as_deref(),
                $($rest)+
            );
        }
    };
}

/// Structured logger bound to a component and, when known, a trace
#[derive(Clone)]
pub struct Logger {
    component: Arc<str>,
    trace_id: Option<String>,
    span_id: Option<String>,
    enabled: bool,
}

impl Logger {
    pub fn new(component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
            trace_id: None,
            span_id: None,
            enabled: true,
        }
    }

    /// Logger that discards everything
    pub fn noop() -> Self {
        Self {
            component: Arc::from(""),
            trace_id: None,
            span_id: None,
            enabled: false,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.enabled
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    fn correlated(&self, trace_id: Option<String>, span_id: Option<String>) -> Self {
        Self {
            trace_id,
            span_id,
            ..self.clone()
        }
    }

    pub fn debug(&self, message: &str) {
        correlated_event!(self, tracing::Level::DEBUG, "{}", message);
    }

    pub fn info(&self, message: &str) {
        correlated_event!(self, tracing::Level::INFO, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        correlated_event!(self, tracing::Level::WARN, "{}", message);
    }

    pub fn error(&self, message: &str, error: &dyn std::error::Error) {
        correlated_event!(self, tracing::Level::ERROR, error = %error, "{}", message);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component)
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Span factory. Wraps the SDK tracer installed by the telemetry pipeline;
/// the no-op variant starts no spans.
#[derive(Clone, Default)]
pub struct Tracer {
    inner: Option<opentelemetry_sdk::trace::Tracer>,
}

impl Tracer {
    pub fn new(tracer: opentelemetry_sdk::trace::Tracer) -> Self {
        Self { inner: Some(tracer) }
    }

    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Start a span under `parent` and return the context holding it
    pub fn start(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> Context {
        match &self.inner {
            Some(tracer) => {
                let span = tracer
                    .span_builder(name)
                    .with_kind(kind)
                    .with_attributes(attributes)
                    .start_with_context(tracer, parent);
                parent.with_span(span)
            }
            None => parent.clone(),
        }
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("noop", &self.is_noop())
            .finish()
    }
}

#[derive(Clone, Default, Debug)]
pub struct CorrelationContext {
    otel: Context,
    logger: Option<Logger>,
    tracer: Option<Tracer>,
    deadline: Option<Instant>,
}

impl CorrelationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(&self, logger: Logger) -> Self {
        Self {
            logger: Some(logger),
            ..self.clone()
        }
    }

    pub fn with_tracer(&self, tracer: Tracer) -> Self {
        Self {
            tracer: Some(tracer),
            ..self.clone()
        }
    }

    /// Continue from an OpenTelemetry context, e.g. one extracted from
    /// inbound request headers
    pub fn with_parent(&self, otel: Context) -> Self {
        Self {
            otel,
            ..self.clone()
        }
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// The attached logger, decorated with the active trace and span ids.
    /// Falls back to a no-op logger when none is attached.
    pub fn logger(&self) -> Logger {
        let base = self.logger.clone().unwrap_or_else(Logger::noop);
        let trace_id = self.trace_id();
        let span_id = self.span_id();

        if trace_id.is_none() && span_id.is_none() {
            return base;
        }
        base.correlated(trace_id, span_id)
    }

    /// The attached tracer, or a no-op tracer
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone().unwrap_or_default()
    }

    pub fn otel_context(&self) -> &Context {
        &self.otel
    }

    pub fn trace_id(&self) -> Option<String> {
        let span = self.otel.span();
        let trace_id = span.span_context().trace_id();
        (trace_id != TraceId::INVALID).then(|| format!("{:032x}", trace_id))
    }

    pub fn span_id(&self) -> Option<String> {
        let span = self.otel.span();
        let span_id = span.span_context().span_id();
        (span_id != SpanId::INVALID).then(|| format!("{:016x}", span_id))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Start an internal child span of the active span
    pub fn start_span(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) -> Self {
        self.start_span_with_kind(name, SpanKind::Internal, attributes)
    }

    pub fn start_span_with_kind(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Self {
        let otel = self.tracer().start(name, kind, attributes, &self.otel);
        self.with_parent(otel)
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.otel.span().set_attribute(attribute);
    }

    pub fn set_error_status(&self, description: impl Into<Cow<'static, str>>) {
        self.otel.span().set_status(Status::error(description));
    }

    pub fn end_span(&self) {
        self.otel.span().end();
    }

    /// Record `error` on the active span and log it
    pub fn handle_unexpected_error(&self, error: &dyn std::error::Error) {
        let span = self.otel.span();
        span.record_error(error);
        span.set_status(Status::error(error.to_string()));
        self.logger().error("unexpected error", error);
    }
}

impl<S> FromRequestParts<S> for CorrelationContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<CorrelationContext>()
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, TraceFlags, TraceState, TracerProvider as _};
    use tracing_test::traced_test;

    /// SDK tracer that samples everything and exports nowhere
    pub(crate) fn test_tracer() -> Tracer {
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        Tracer::new(provider.tracer("test"))
    }

    fn remote_parent() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]),
            SpanId::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("database exploded")]
    struct Boom;

    #[test]
    fn test_attach_returns_new_context() {
        let base = CorrelationContext::new();
        let with_logger = base.with_logger(Logger::new("orders"));

        assert!(base.logger().is_noop());
        assert!(!with_logger.logger().is_noop());
        assert_eq!(with_logger.logger().component(), "orders");
    }

    #[test]
    fn test_missing_logger_and_tracer_fall_back_to_noop() {
        let cx = CorrelationContext::new();
        assert!(cx.logger().is_noop());
        assert!(cx.tracer().is_noop());

        // Neither call panics
        cx.logger().info("dropped");
        let child = cx.start_span("work", vec![]);
        assert!(child.trace_id().is_none());
        child.end_span();
    }

    #[test]
    fn test_same_logger_observed_downstream() {
        let cx = CorrelationContext::new().with_logger(Logger::new("catalog"));
        let downstream = cx.with_deadline(Instant::now() + Duration::from_secs(1));
        assert_eq!(downstream.logger().component(), "catalog");
    }

    #[test]
    fn test_no_ids_without_active_span() {
        let cx = CorrelationContext::new().with_logger(Logger::new("orders"));
        let logger = cx.logger();
        assert_eq!(logger.trace_id(), None);
        assert_eq!(logger.span_id(), None);
    }

    #[test]
    fn test_remote_parent_ids_are_formatted() {
        let cx = CorrelationContext::new()
            .with_logger(Logger::new("orders"))
            .with_parent(remote_parent());

        let logger = cx.logger();
        assert_eq!(logger.trace_id(), Some("0102030405060708090a0b0c0d0e0f10"));
        assert_eq!(logger.span_id(), Some("0102030405060708"));
    }

    #[test]
    fn test_child_span_keeps_trace_and_gets_new_span_id() {
        let tracer = test_tracer();
        let cx = CorrelationContext::new()
            .with_tracer(tracer)
            .with_parent(remote_parent());

        let child = cx.start_span("lookup", vec![KeyValue::new("user.id", "42")]);
        assert_eq!(child.trace_id(), cx.trace_id());
        assert!(child.span_id().is_some());
        assert_ne!(child.span_id(), cx.span_id());
        child.end_span();
    }

    #[traced_test]
    #[test]
    fn test_logger_adds_ids_when_span_active() {
        let tracer = test_tracer();
        let cx = CorrelationContext::new()
            .with_logger(Logger::new("orders"))
            .with_tracer(tracer)
            .start_span("handle", vec![]);

        let span_id = cx.span_id().unwrap();
        cx.logger().info("order accepted");
        cx.end_span();

        assert!(logs_contain("order accepted"));
        assert!(logs_contain("trace_id"));
        assert!(logs_contain(&span_id));
    }

    #[traced_test]
    #[test]
    fn test_logger_omits_ids_without_span() {
        let cx = CorrelationContext::new().with_logger(Logger::new("orders"));
        cx.logger().info("no trace here");

        assert!(logs_contain("no trace here"));
        assert!(!logs_contain("trace_id"));
        assert!(!logs_contain("span_id"));
    }

    #[traced_test]
    #[test]
    fn test_noop_logger_emits_nothing() {
        CorrelationContext::new().logger().warn("silenced message");
        assert!(!logs_contain("silenced message"));
    }

    #[traced_test]
    #[test]
    fn test_handle_unexpected_error_logs() {
        let tracer = test_tracer();
        let cx = CorrelationContext::new()
            .with_logger(Logger::new("orders"))
            .with_tracer(tracer)
            .start_span("handle", vec![]);

        cx.handle_unexpected_error(&Boom);
        cx.end_span();

        assert!(logs_contain("unexpected error"));
        assert!(logs_contain("database exploded"));
    }

    #[tokio::test]
    async fn test_remaining_time_shrinks_to_zero() {
        let cx = CorrelationContext::new().with_deadline(Instant::now());
        assert_eq!(cx.remaining(), Some(Duration::ZERO));
        assert_eq!(CorrelationContext::new().remaining(), None);
    }

    #[tokio::test]
    async fn test_extracted_from_request_extensions() {
        let cx = CorrelationContext::new()
            .with_logger(Logger::new("orders"))
            .with_parent(remote_parent());

        let (mut parts, _) = axum::http::Request::builder()
            .extension(cx)
            .body(())
            .unwrap()
            .into_parts();

        let extracted = CorrelationContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted.logger().component(), "orders");
        assert_eq!(
            extracted.trace_id().as_deref(),
            Some("0102030405060708090a0b0c0d0e0f10")
        );

        let (mut bare, _) = axum::http::Request::new(()).into_parts();
        let fallback = CorrelationContext::from_request_parts(&mut bare, &()).await.unwrap();
        assert!(fallback.logger().is_noop());
    }
}
