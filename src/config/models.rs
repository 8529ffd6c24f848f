use garde::Validate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,

    #[garde(dive)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[garde(dive)]
    #[serde(default)]
    pub metrics: MetricsConfig,

    #[garde(dive)]
    #[serde(default)]
    pub sampler: SamplerConfig,

    #[garde(dive)]
    #[serde(default)]
    pub retry: RetryConfig,

    #[garde(dive)]
    #[serde(default)]
    pub producer: ProducerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,

    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,

    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds

    /// Upper bound for a single request; also becomes the request deadline
    #[garde(range(min = 1, max = 600))]
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8989,
            bind: default_bind(),
            shutdown_timeout: default_shutdown_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String, // trace, debug, info, warn, error

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Tracer pipeline settings. Field names match the plain environment
/// variables (`SERVICE_NAME`, `COLLECTOR_ENDPOINT`, ...) they can be set from.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[garde(length(min = 1))]
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[garde(length(min = 1))]
    #[serde(default = "default_service_namespace")]
    pub service_namespace: String,

    #[garde(length(min = 1))]
    #[serde(default = "default_deployment_environment")]
    pub deployment_environment: String,

    #[garde(length(min = 1), pattern(r"^https?://"))]
    #[serde(default = "default_collector_endpoint")]
    pub collector_endpoint: String,

    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    #[garde(range(min = 1, max = 120))]
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "myapp".to_string()
}

fn default_service_namespace() -> String {
    "mynamespace".to_string()
}

fn default_deployment_environment() -> String {
    "production".to_string()
}

fn default_collector_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

fn default_export_timeout() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: default_service_name(),
            service_namespace: default_service_namespace(),
            deployment_environment: default_deployment_environment(),
            collector_endpoint: default_collector_endpoint(),
            sampling_ratio: default_sampling_ratio(),
            export_timeout_secs: default_export_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MetricsConfig {
    /// Serve the scrape endpoint on its own listener as well as `/metrics`
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub listener_enabled: bool,

    #[garde(range(min = 1024, max = 65535))]
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Query parameter names promoted to `"true"`/`"false"` labels on RED metrics
    #[garde(custom(validate_label_names))]
    #[serde(default)]
    pub additional_labels: Vec<String>,
}

fn default_metrics_port() -> u16 {
    1616
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listener_enabled: true,
            port: default_metrics_port(),
            additional_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SamplerConfig {
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[garde(range(min = 1, max = 3600))]
    #[serde(default = "default_sampler_period")]
    pub period_secs: u64,

    /// Gap between the two `/proc/stat` reads of one CPU sample
    #[garde(range(min = 10, max = 60000))]
    #[serde(default = "default_sampler_window")]
    pub window_ms: u64,
}

fn default_sampler_period() -> u64 {
    5
}

fn default_sampler_window() -> u64 {
    1000
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_secs: default_sampler_period(),
            window_ms: default_sampler_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RetryConfig {
    #[garde(skip)]
    #[serde(default)]
    pub strategy: BackoffKind,

    /// Step for linear backoff, base for exponential backoff
    #[garde(range(min = 1, max = 600000))]
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[garde(range(min = 1, max = 3600000))]
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[garde(range(min = 1, max = 100))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Explicit wait plan; overrides the strategy when non-empty
    #[garde(length(max = 100))]
    #[serde(default)]
    pub waits_ms: Vec<u64>,

    #[garde(inner(range(min = 100, max = 599)))]
    #[serde(default)]
    pub retryable_status_codes: Vec<u16>,

    #[garde(range(min = 1, max = 600))]
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
}

fn default_base_delay() -> u64 {
    2000
}

fn default_max_delay() -> u64 {
    60000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_attempt_timeout() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::default(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
            waits_ms: Vec::new(),
            retryable_status_codes: Vec::new(),
            attempt_timeout_secs: default_attempt_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ProducerConfig {
    #[garde(skip)]
    #[serde(default)]
    pub enabled: bool,

    /// Base URL the producer posts users and products to
    #[garde(pattern(r"^https?://"))]
    #[serde(default = "default_producer_target")]
    pub target_url: String,

    #[garde(range(min = 10, max = 3600000))]
    #[serde(default = "default_producer_interval")]
    pub interval_ms: u64,
}

fn default_producer_target() -> String {
    "http://127.0.0.1:8989".to_string()
}

fn default_producer_interval() -> u64 {
    2000
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_url: default_producer_target(),
            interval_ms: default_producer_interval(),
        }
    }
}

fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value
        .parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}

fn validate_label_names(value: &[String], _: &()) -> garde::Result {
    for name in value {
        if !crate::middleware::red_metrics::is_valid_label_name(name) {
            return Err(garde::Error::new(format!("Invalid metric label name: {}", name)));
        }
    }
    Ok(())
}
