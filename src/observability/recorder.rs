//! Prometheus metrics registry
//!
//! One `MetricsRegistry` is built at startup and handed to every component
//! that records metrics. It owns a local `PrometheusRecorder` instead of
//! installing a global one, so each registry (and each test) sees only its
//! own series.
//!
//! The schema is fixed here:
//! - RED metrics for inbound HTTP requests, duration in milliseconds
//! - an in-flight request gauge
//! - CPU and memory gauges fed by the resource sampler

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use metrics::{Label, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::config::TelemetryConfig;
use crate::observability::sampler::MemoryReading;

pub const REQUEST_DURATION: &str = "http_server_request_duration_ms";
pub const REQUESTS_TOTAL: &str = "http_server_requests_total";
pub const REQUEST_ERRORS_TOTAL: &str = "http_server_request_errors_total";
pub const ACTIVE_REQUESTS: &str = "http_server_active_requests";
pub const CPU_USAGE: &str = "app_cpu_usage_percent";
pub const MEMORY_RESIDENT: &str = "app_memory_usage_bytes";
pub const MEMORY_VIRTUAL: &str = "app_memory_virtual_bytes";
pub const SYSTEM_MEMORY_FREE: &str = "system_memory_free_bytes";

pub const LABEL_STATUS_CODE: &str = "http_response_status_code";
pub const LABEL_METHOD: &str = "http_request_method";
pub const LABEL_ROUTE: &str = "http_route";

/// Sentinel values for presence labels
pub const LABEL_TRUE: &str = "true";
pub const LABEL_FALSE: &str = "false";

/// Histogram buckets for request duration, in milliseconds
pub const DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 300.0, 500.0, 1000.0, 5000.0, 10000.0,
];

/// Labels attached to every series exported by a registry
#[derive(Debug, Clone)]
pub struct RegistryLabels {
    pub service: String,
    pub namespace: String,
    pub environment: String,
}

impl From<&TelemetryConfig> for RegistryLabels {
    fn from(config: &TelemetryConfig) -> Self {
        Self {
            service: config.service_name.clone(),
            namespace: config.service_namespace.clone(),
            environment: config.deployment_environment.clone(),
        }
    }
}

impl Default for RegistryLabels {
    fn default() -> Self {
        (&TelemetryConfig::default()).into()
    }
}

/// One completed request, as observed by the RED middleware
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSample {
    pub method: String,
    pub route: String,
    pub status: u16,
    pub duration: Duration,
    /// Configured label name and whether the matching query key was present
    pub extra: Vec<(String, bool)>,
}

impl RequestSample {
    fn base_labels(&self) -> Vec<Label> {
        vec![
            Label::new(LABEL_STATUS_CODE, self.status.to_string()),
            Label::new(LABEL_METHOD, self.method.clone()),
            Label::new(LABEL_ROUTE, self.route.clone()),
        ]
    }

    fn labels(&self) -> Vec<Label> {
        let mut labels = self.base_labels();
        labels.extend(self.extra.iter().map(|(name, present)| {
            Label::new(name.clone(), if *present { LABEL_TRUE } else { LABEL_FALSE })
        }));
        labels
    }

    fn duration_ms(&self) -> f64 {
        self.duration.as_micros() as f64 / 1000.0
    }
}

/// Shared, cheaply cloneable handle to the process metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

impl MetricsRegistry {
    pub fn new(labels: &RegistryLabels) -> Result<Self> {
        let recorder = PrometheusBuilder::new()
            .add_global_label("service", &labels.service)
            .add_global_label("namespace", &labels.namespace)
            .add_global_label("environment", &labels.environment)
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION.to_string()),
                DURATION_BUCKETS_MS,
            )
            .map_err(|e| anyhow!("Failed to configure request duration buckets: {}", e))?
            .build_recorder();

        let registry = Self {
            handle: recorder.handle(),
            recorder: Arc::new(recorder),
        };
        registry.describe();

        tracing::info!(
            service = %labels.service,
            namespace = %labels.namespace,
            environment = %labels.environment,
            "Prometheus metrics registry initialized"
        );

        Ok(registry)
    }

    fn describe(&self) {
        self.emit("describe", || {
            metrics::describe_histogram!(
                REQUEST_DURATION,
                Unit::Milliseconds,
                "Duration of HTTP server requests"
            );
            metrics::describe_counter!(REQUESTS_TOTAL, "HTTP server requests handled");
            metrics::describe_counter!(
                REQUEST_ERRORS_TOTAL,
                "HTTP server requests that ended with a 5xx status"
            );
            metrics::describe_gauge!(ACTIVE_REQUESTS, "HTTP server requests in flight");
            metrics::describe_gauge!(CPU_USAGE, Unit::Percent, "Host CPU utilization");
            metrics::describe_gauge!(MEMORY_RESIDENT, Unit::Bytes, "Process resident memory");
            metrics::describe_gauge!(MEMORY_VIRTUAL, Unit::Bytes, "Process virtual memory");
            metrics::describe_gauge!(SYSTEM_MEMORY_FREE, Unit::Bytes, "Free system memory");
        });
    }

    /// Run `f` against this registry's recorder. A panic while recording is
    /// contained and logged so callers never observe it.
    fn emit<F: FnOnce()>(&self, what: &'static str, f: F) {
        let recorder = self.recorder.as_ref();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            metrics::with_local_recorder(recorder, f)
        }));

        if outcome.is_err() {
            tracing::warn!(metric = what, "Metric emission failed, observation dropped");
        }
    }

    /// Record the RED metrics for one finished request
    pub fn observe_request(&self, sample: &RequestSample) {
        self.emit(REQUEST_DURATION, || {
            let labels = sample.labels();
            metrics::histogram!(REQUEST_DURATION, labels.clone()).record(sample.duration_ms());
            metrics::counter!(REQUESTS_TOTAL, labels).increment(1);

            if sample.status >= 500 {
                metrics::counter!(REQUEST_ERRORS_TOTAL, sample.base_labels()).increment(1);
            }
        });
    }

    pub fn request_started(&self) {
        self.emit(ACTIVE_REQUESTS, || {
            metrics::gauge!(ACTIVE_REQUESTS).increment(1.0);
        });
    }

    pub fn request_finished(&self) {
        self.emit(ACTIVE_REQUESTS, || {
            metrics::gauge!(ACTIVE_REQUESTS).decrement(1.0);
        });
    }

    pub fn set_cpu_usage(&self, percent: f64) {
        self.emit(CPU_USAGE, || {
            metrics::gauge!(CPU_USAGE).set(percent);
        });
    }

    pub fn set_memory(&self, reading: &MemoryReading) {
        self.emit(MEMORY_RESIDENT, || {
            metrics::gauge!(MEMORY_RESIDENT).set(reading.resident_bytes as f64);
            metrics::gauge!(MEMORY_VIRTUAL).set(reading.virtual_bytes as f64);
            metrics::gauge!(SYSTEM_MEMORY_FREE).set(reading.system_free_bytes as f64);
        });
    }

    /// Prometheus text exposition of every series in this registry
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
