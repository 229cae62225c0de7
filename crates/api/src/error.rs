//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::{CheckoutError, WebhookError};
use domain::OrderError;
use serde_json::{Value, json};

/// Shown when a payment fails; the cart is kept so the shopper can retry.
pub const PAYMENT_FAILED_MESSAGE: &str =
    "payment could not be completed, your cart has been preserved";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller is not allowed to see or change the resource.
    Forbidden(String),
    /// Checkout, cart or order error.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": msg }),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, Value) {
    let message = err.to_string();
    match &err {
        CheckoutError::EmptyCart
        | CheckoutError::MissingIdempotencyKey
        | CheckoutError::InvalidQuantity { .. } => {
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
        CheckoutError::ItemNotFound { .. }
        | CheckoutError::ProductNotFound { .. }
        | CheckoutError::OrderNotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
        CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": format!("only {available} of {product_id} available"),
                "product_id": product_id,
                "requested": requested,
                "available": available,
            }),
        ),
        CheckoutError::OrderCreationFailed { .. } => {
            tracing::error!(error = %message, "order creation failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": message }),
            )
        }
        CheckoutError::PaymentGateway { order_id, .. } => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": PAYMENT_FAILED_MESSAGE, "order_id": order_id }),
        ),
        CheckoutError::PaymentTimeout { order_id } => (
            StatusCode::GATEWAY_TIMEOUT,
            json!({ "error": PAYMENT_FAILED_MESSAGE, "order_id": order_id }),
        ),
        CheckoutError::RefundFailed { .. } => {
            (StatusCode::BAD_GATEWAY, json!({ "error": message }))
        }
        CheckoutError::IdempotencyConflict(_)
        | CheckoutError::OrderCancelled(_)
        | CheckoutError::InvalidStatusTransition { .. }
        | CheckoutError::InvalidPaymentTransition { .. }
        | CheckoutError::NotAwaitingPayment { .. }
        | CheckoutError::Order(OrderError::ConcurrentModification(_))
        | CheckoutError::Order(OrderError::PaymentRefMismatch { .. }) => {
            (StatusCode::CONFLICT, json!({ "error": message }))
        }
        CheckoutError::Webhook(WebhookError::InvalidPayload(_)) => {
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
        CheckoutError::Webhook(e) if !matches!(e, WebhookError::InvalidKey) => {
            (StatusCode::UNAUTHORIZED, json!({ "error": message }))
        }
        _ => {
            tracing::error!(error = %message, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": message }),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Checkout(err.into())
    }
}

impl From<domain::CartError> for ApiError {
    fn from(err: domain::CartError) -> Self {
        ApiError::Checkout(err.into())
    }
}

impl From<domain::InventoryError> for ApiError {
    fn from(err: domain::InventoryError) -> Self {
        ApiError::Checkout(err.into())
    }
}
