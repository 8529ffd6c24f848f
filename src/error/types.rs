use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Not enough of the request deadline is left to finish the work
    #[error("Request deadline exceeded")]
    DeadlineExceeded,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::DeadlineExceeded => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Both messages are fixed or caller-supplied; nothing internal leaks
        (status, self.to_string()).into_response()
    }
}
