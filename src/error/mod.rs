pub mod types;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_error_display_messages() {
        let err = AppError::InvalidInput("user is required".to_string());
        assert_eq!(err.to_string(), "Invalid input: user is required");

        assert_eq!(AppError::DeadlineExceeded.to_string(), "Request deadline exceeded");
    }

    #[test]
    fn test_error_to_response_conversion() {
        let response = AppError::InvalidInput("test".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::DeadlineExceeded.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_deadline_body_is_fixed() {
        let response = AppError::DeadlineExceeded.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), "Request deadline exceeded");
    }
}
