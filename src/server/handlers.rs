//! Demo HTTP handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};

use super::runtime::AppState;
use crate::error::AppError;
use crate::observability::context::CorrelationContext;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRequest {
    pub user: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductRequest {
    pub product: String,
}

/// `POST /user`
pub async fn get_user(
    State(state): State<AppState>,
    cx: CorrelationContext,
    payload: Result<Json<UserRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let Json(request) = decode(&cx, payload)?;

    let cx = cx.start_span("handler.get_user", vec![KeyValue::new("user", request.user.clone())]);
    let result = state.catalog.get_user(&cx, &request.user).await;
    finish(&cx, result)
}

/// `POST /product`
pub async fn get_product(
    State(state): State<AppState>,
    cx: CorrelationContext,
    payload: Result<Json<ProductRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let Json(request) = decode(&cx, payload)?;

    let cx = cx.start_span(
        "handler.get_product",
        vec![KeyValue::new("product", request.product.clone())],
    );
    let result = state.catalog.get_product(&cx, &request.product).await;
    finish(&cx, result)
}

fn decode<T>(
    cx: &CorrelationContext,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<Json<T>, AppError> {
    payload.map_err(|rejection| {
        cx.logger().error("error on bind json", &rejection);
        AppError::InvalidInput("Invalid request payload".to_string())
    })
}

fn finish(cx: &CorrelationContext, result: Result<String, AppError>) -> Result<String, AppError> {
    match &result {
        Ok(data) => cx.logger().info(data),
        Err(AppError::InvalidInput(msg)) => cx.logger().warn(msg),
        Err(e) => cx.handle_unexpected_error(e),
    }
    cx.end_span();
    result
}
