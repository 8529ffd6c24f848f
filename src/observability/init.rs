//! Observability initialization
//!
//! Sets up the process-wide `tracing` subscriber (log output plus the
//! OpenTelemetry bridge) and the tracer provider at server startup.

use anyhow::{Result, anyhow};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use super::context::Tracer;
use super::tracing::{TracingConfig, create_tracer_provider, install_propagator, shutdown_tracing};
use crate::config::{LoggingConfig, TelemetryConfig};

/// Handle to the telemetry pipeline built at startup
pub struct Telemetry {
    provider: Option<TracerProvider>,
    tracer: Tracer,
}

impl Telemetry {
    /// Tracer for request and background contexts; no-op when tracing is disabled
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    /// Flush and stop the span exporter
    pub async fn shutdown(self) {
        if let Some(provider) = self.provider {
            shutdown_tracing(provider).await;
        }
    }
}

/// Install the global subscriber with logging and, when enabled, span export.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_telemetry(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> Result<Telemetry> {
    init_telemetry_with_writer(logging, telemetry, std::io::stdout)
}

/// [`init_telemetry`] with log lines written to `writer` instead of stdout
pub fn init_telemetry_with_writer<W>(
    logging: &LoggingConfig,
    telemetry: &TelemetryConfig,
    writer: W,
) -> Result<Telemetry>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let tracing_config = TracingConfig::from(telemetry);
    install_propagator();

    let provider = if tracing_config.enabled {
        Some(create_tracer_provider(&tracing_config)?)
    } else {
        None
    };

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(tracing_config.service_name.clone()))
    });

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| anyhow!("Invalid log level {:?}: {}", logging.level, e))?;

    let subscriber = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    let installed = if logging.format == "json" {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .try_init()
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(writer))
            .try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    let tracer = provider
        .as_ref()
        .map(|provider| Tracer::new(provider.tracer(tracing_config.service_name.clone())))
        .unwrap_or_default();

    // Logged only now that the subscriber is installed
    if provider.is_some() {
        tracing::info!(
            endpoint = %tracing_config.otlp_endpoint,
            sampling_ratio = %tracing_config.sampling_ratio,
            service = %tracing_config.service_name,
            instance = %tracing_config.service_instance_id,
            "Distributed tracing initialized"
        );
    }

    tracing::info!(
        tracing_enabled = %tracing_config.enabled,
        log_format = %logging.format,
        service = %tracing_config.service_name,
        environment = %tracing_config.environment,
        "Unified telemetry system initialized"
    );

    Ok(Telemetry { provider, tracer })
}
