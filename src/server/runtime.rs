use std::future::{Future, IntoFuture};
use std::time::Duration;

use anyhow::Result;
use axum::{
    Router,
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer};
use tracing::{error, info, warn};

use super::handlers::{get_product, get_user};
use crate::config::AppConfig;
use crate::middleware::{
    CorrelationLayerState, RedMetrics, correlation_middleware, red_metrics_middleware,
};
use crate::observability::context::CorrelationContext;
use crate::observability::endpoint::{metrics_endpoint, metrics_router};
use crate::observability::recorder::MetricsRegistry;
use crate::services::CatalogService;

/// Shared state of the main router
#[derive(Debug, Clone, FromRef)]
pub struct AppState {
    pub registry: MetricsRegistry,
    pub catalog: CatalogService,
}

/// Start the HTTP server and serve until a shutdown signal arrives
///
/// Binds the configured address before serving, so bind failures surface as
/// startup errors.
pub async fn start_server(config: &AppConfig, state: AppState, base: CorrelationContext) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}: {}. Is another process using this port?",
            bind_addr,
            e
        )
    })?;
    info!("Server listening on {}", bind_addr);

    let app = create_router(config, state, base);
    let drain = Duration::from_secs(config.server.shutdown_timeout);
    serve(listener, app, shutdown_signal(), drain).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Serve `app` until `shutdown` resolves, then drain open connections
///
/// Requests still running `drain` after the signal are abandoned and the
/// call returns.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
    drain: Duration,
) -> Result<()> {
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let shutdown = async move {
        shutdown.await;
        let _ = signalled_tx.send(());
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .into_future();

    let drain_deadline = async move {
        if signalled_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(drain).await;
    };

    tokio::select! {
        result = server => result?,
        _ = drain_deadline => {
            warn!(drain_secs = drain.as_secs_f64(), "Graceful shutdown timed out, dropping open connections");
        }
    }
    Ok(())
}

/// Build the main router
///
/// Layer order, outermost first: correlation, RED metrics, request timeout,
/// panic recovery. Timeouts and panics are therefore recorded with their
/// 408 and 500 statuses under the request's trace.
pub fn create_router(config: &AppConfig, state: AppState, base: CorrelationContext) -> Router {
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);
    let red = RedMetrics::new(state.registry.clone(), &config.metrics.additional_labels);
    let correlation = CorrelationLayerState::new(base, request_timeout);

    Router::new()
        .route("/user", post(get_user))
        .route("/product", post(get_product))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn_with_state(red, red_metrics_middleware))
        .layer(from_fn_with_state(correlation, correlation_middleware))
}

/// Bind the dedicated metrics listener and serve it in the background
pub async fn spawn_metrics_listener(bind: &str, port: u16, registry: MetricsRegistry) -> Result<JoinHandle<()>> {
    let bind_addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind metrics listener to {}: {}", bind_addr, e))?;
    info!("Metrics listener on {}", bind_addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, metrics_router(registry)).await {
            error!(error = %e, "Metrics listener stopped");
        }
    }))
}

/// Wait for SIGINT or SIGTERM
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
