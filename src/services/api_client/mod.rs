//! HTTP client with retries under a pluggable backoff strategy
//!
//! # Retry plan
//!
//! Every call runs against a plan of wait durations. The plan length is the
//! maximum number of attempts; after failed attempt `i` the client waits
//! `plan[i]` before trying again, and it never waits after the final
//! attempt. An empty plan on the request means "use the client's default
//! plan", generated from its [`BackoffStrategy`] and configured attempt count
//! (or taken verbatim from `retry.waits_ms` when set).
//!
//! An attempt fails when no response body could be obtained (transport or
//! body-read error) or when the status is one of the configured retryable
//! statuses. Any other status, including 4xx and 5xx, is a successful call and
//! its body is returned.
//!
//! # Deadlines
//!
//! A request deadline (explicit, or taken from the [`CorrelationContext`])
//! bounds every attempt. When the next wait would cross it the call ends with
//! [`ClientError::DeadlineExceeded`] instead of sleeping.
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn example(client: ot_prometheus::services::api_client::RetryingClient) {
//! use std::time::Duration;
//!
//! let body = client
//!     .post("http://127.0.0.1:8989/user")
//!     .json(&serde_json::json!({ "user": "ada" }))
//!     .waits(vec![Duration::from_millis(100), Duration::from_millis(200)])
//!     .send()
//!     .await;
//! # }
//! ```
//!
//! [`CorrelationContext`]: crate::observability::CorrelationContext

pub mod backoff;
pub mod retry;

use thiserror::Error;

pub use backoff::{BackoffStrategy, ExponentialBackoff, LinearBackoff, strategy_from_config};
pub use retry::{RequestBuilder, RetryingClient};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("Deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}
