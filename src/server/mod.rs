pub mod handlers;
pub mod producer;
pub mod runtime;

pub use producer::Producer;
pub use runtime::{AppState, create_router, serve, spawn_metrics_listener, start_server};
