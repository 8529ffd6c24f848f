//! Distributed tracing with OpenTelemetry
//!
//! Spans are exported over OTLP/gRPC with a batch processor on the Tokio
//! runtime and sampled by trace id ratio. Trace context travels between
//! services in W3C `traceparent`/`tracestate` headers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = TracingConfig::from(&app_config.telemetry);
//! let provider = create_tracer_provider(&config)?;
//! let tracer = Tracer::new(provider.tracer(config.service_name.clone()));
//! ```

use std::time::Duration;

use anyhow::Result;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::{Resource, runtime};
use tracing::info;
use uuid::Uuid;

use crate::config::TelemetryConfig;

/// Configuration for distributed tracing
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint for exporting traces
    pub otlp_endpoint: String,
    /// Sample ratio (0.0-1.0). 1.0 = sample all traces
    pub sampling_ratio: f64,
    pub service_name: String,
    pub service_namespace: String,
    pub service_version: String,
    /// Unique per process start
    pub service_instance_id: String,
    pub environment: String,
    pub enabled: bool,
    /// Batch export timeout
    pub export_timeout: Duration,
}

impl From<&TelemetryConfig> for TracingConfig {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            otlp_endpoint: config.collector_endpoint.clone(),
            sampling_ratio: config.sampling_ratio,
            service_name: config.service_name.clone(),
            service_namespace: config.service_namespace.clone(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            service_instance_id: Uuid::new_v4().to_string(),
            environment: config.deployment_environment.clone(),
            enabled: config.enabled,
            export_timeout: Duration::from_secs(config.export_timeout_secs),
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::from(&TelemetryConfig::default())
    }
}

impl TracingConfig {
    pub fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new("service.name", self.service_name.clone()),
            KeyValue::new("service.namespace", self.service_namespace.clone()),
            KeyValue::new("service.version", self.service_version.clone()),
            KeyValue::new("service.instance.id", self.service_instance_id.clone()),
            KeyValue::new("deployment.environment", self.environment.clone()),
        ])
    }
}

/// Build the OTLP tracer provider. Must be called within a Tokio runtime.
pub fn create_tracer_provider(config: &TracingConfig) -> Result<TracerProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint)
        .with_timeout(config.export_timeout);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(config.sampling_ratio))
                .with_resource(config.resource()),
        )
        .install_batch(runtime::Tokio)?;

    Ok(provider)
}

/// Install the W3C trace-context propagator used by [`extract_trace_context`]
/// and [`inject_trace_context`]
pub fn install_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}

/// Extract a remote parent context from inbound HTTP headers
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Write the span context of `cx` into outbound HTTP headers
pub fn inject_trace_context(cx: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(headers))
    });
}

/// Flush pending spans and stop the exporter
pub async fn shutdown_tracing(provider: TracerProvider) {
    let result = tokio::task::spawn_blocking(move || provider.shutdown()).await;
    match result {
        Ok(Ok(())) => info!("Tracer provider shut down"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Tracer provider shutdown failed"),
        Err(e) => tracing::warn!(error = %e, "Tracer provider shutdown task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    fn sampled_context() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn test_tracing_config_from_telemetry() {
        let telemetry = TelemetryConfig {
            service_name: "checkout".to_string(),
            sampling_ratio: 0.5,
            ..TelemetryConfig::default()
        };

        let config = TracingConfig::from(&telemetry);
        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.service_namespace, "mynamespace");
        assert_eq!(config.environment, "production");
        assert_eq!(config.sampling_ratio, 0.5);
        assert_eq!(config.service_version, env!("CARGO_PKG_VERSION"));
        assert!(Uuid::parse_str(&config.service_instance_id).is_ok());
    }

    #[test]
    fn test_instance_id_differs_per_config() {
        let first = TracingConfig::default();
        let second = TracingConfig::default();
        assert_ne!(first.service_instance_id, second.service_instance_id);
    }

    #[test]
    fn test_resource_attributes() {
        let config = TracingConfig::default();
        let resource = config.resource();

        assert_eq!(
            resource.get("service.name".into()).map(|v| v.to_string()),
            Some("myapp".to_string())
        );
        assert_eq!(
            resource.get("deployment.environment".into()).map(|v| v.to_string()),
            Some("production".to_string())
        );
        assert!(resource.get("service.instance.id".into()).is_some());
    }

    #[test]
    fn test_inject_then_extract_preserves_ids() {
        install_propagator();

        let mut headers = HeaderMap::new();
        inject_trace_context(&sampled_context(), &mut headers);

        let traceparent = headers.get("traceparent").unwrap().to_str().unwrap();
        assert_eq!(
            traceparent,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        );

        let extracted = extract_trace_context(&headers);
        let span = extracted.span();
        let span_context = span.span_context();
        assert!(span_context.is_remote());
        assert_eq!(
            format!("{:032x}", span_context.trace_id()),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[test]
    fn test_extract_without_headers_has_no_span() {
        install_propagator();

        let extracted = extract_trace_context(&HeaderMap::new());
        assert!(!extracted.span().span_context().is_valid());
    }
}
