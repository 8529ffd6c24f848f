pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod services;

pub use config::*;
pub use error::*;
pub use server::*;

use std::panic;
use std::sync::Arc;

use anyhow::Result;

use crate::observability::{
    CorrelationContext, Logger, MetricsRegistry, ProcfsProbe, RegistryLabels, ResourceSampler,
    init_telemetry,
};
use crate::services::RetryingClient;

/// Main server entry point for library usage
pub async fn run_server(cli: Cli) -> Result<()> {
    let app_config = config::load_config(&cli)?;

    let telemetry = init_telemetry(&app_config.logging, &app_config.telemetry)?;
    ::tracing::info!(
        service = %app_config.telemetry.service_name,
        environment = %app_config.telemetry.deployment_environment,
        "Telemetry initialized"
    );

    // Log panics; CatchPanicLayer turns handler panics into 500s
    panic::set_hook(Box::new(|panic_info| {
        ::tracing::error!(panic = %panic_info, "Panic occurred");
    }));

    let registry = MetricsRegistry::new(&RegistryLabels::from(&app_config.telemetry))?;
    let base = CorrelationContext::new()
        .with_logger(Logger::new(app_config.telemetry.service_name.clone()))
        .with_tracer(telemetry.tracer());

    let mut background = Vec::new();

    if app_config.sampler.enabled {
        let sampler = ResourceSampler::new(
            Arc::new(ProcfsProbe::new()),
            registry.clone(),
            &app_config.sampler,
        );
        background.push(sampler.spawn());
    }

    if app_config.metrics.listener_enabled {
        background.push(
            server::spawn_metrics_listener(
                &app_config.server.bind,
                app_config.metrics.port,
                registry.clone(),
            )
            .await?,
        );
    }

    if app_config.producer.enabled {
        let client = RetryingClient::new(&app_config.retry)?;
        let producer = Producer::new(
            client,
            &app_config.producer,
            base.with_logger(Logger::new("producer")),
        );
        background.push(producer.spawn());
    }

    let state = AppState {
        registry,
        catalog: services::CatalogService::new(),
    };
    let result = server::start_server(&app_config, state, base).await;

    for task in background {
        task.abort();
    }
    telemetry.shutdown().await;

    result
}
