pub mod correlation;
pub mod red_metrics;

pub use correlation::{CorrelationLayerState, correlation_middleware};
pub use red_metrics::{CLIENT_CLOSED_REQUEST, RedMetrics, UNMATCHED_ROUTE, is_valid_label_name, red_metrics_middleware};
