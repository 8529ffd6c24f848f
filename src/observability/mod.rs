//! Observability for the service
//!
//! - Correlation of logs and traces per request ([`context`])
//! - Prometheus metrics registry and scrape endpoint
//! - Distributed tracing with OpenTelemetry
//! - Background CPU and memory sampling

pub mod context;
pub mod endpoint;
pub mod init;
pub mod recorder;
pub mod sampler;
pub mod tracing;

pub use context::{CorrelationContext, Logger, Tracer};
pub use endpoint::{metrics_endpoint, metrics_router};
pub use init::{Telemetry, init_telemetry, init_telemetry_with_writer};
pub use recorder::{MetricsRegistry, RegistryLabels, RequestSample};
pub use sampler::{
    CpuTicks, MemoryReading, ProcfsProbe, ResourceReading, ResourceSampler, SamplerError,
    SystemProbe,
};
pub use self::tracing::{TracingConfig, extract_trace_context, inject_trace_context};
