//! Payment gateway trait and adapters.

pub mod http;
pub mod memory;

pub use http::{HttpGatewayConfig, HttpPaymentGateway};
pub use memory::InMemoryPaymentGateway;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{IdempotencyKey, Money, OrderId, PaymentMethod, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never got a response.
    #[error("Gateway unreachable: {0}")]
    Network(String),

    /// The gateway answered with a 5xx.
    #[error("Gateway error {status}: {body}")]
    Server { status: u16, body: String },

    /// The gateway refused the request (4xx).
    #[error("Gateway rejected the request: {0}")]
    Rejected(String),

    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    /// The response could not be understood.
    #[error("Unexpected gateway response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::UnexpectedResponse(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// One line of the purchase, as shown to the payment network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Request to open a payment for an order.
#[derive(Debug, Clone, Serialize)]
pub struct IntentRequest {
    pub order_id: OrderId,
    pub idempotency_key: IdempotencyKey,
    pub amount: Money,
    pub currency: String,
    pub method: PaymentMethod,
    pub line_items: Vec<GatewayLineItem>,
}

/// The gateway's handle on a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRef {
    pub id: String,
    /// Where the buyer approves the payment; set for wallet payments.
    #[serde(default)]
    pub approval_url: Option<String>,
}

/// Outcome of a capture the gateway answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub success: bool,
    #[serde(default)]
    pub external_capture_id: Option<String>,
    /// Why the capture was declined.
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl CaptureResult {
    pub fn captured(capture_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_capture_id: Some(capture_id.into()),
            failure_reason: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            external_capture_id: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// A remote, possibly slow, possibly failing payment network.
///
/// Callers bound every call with a timeout. Implementations must treat the
/// idempotency key as the identity of the request so a retried call never
/// charges twice.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent (card) or payment order (wallet).
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentRef, GatewayError>;

    /// Captures the funds of an intent.
    async fn capture(
        &self,
        intent_id: &str,
        idempotency_key: &IdempotencyKey,
    ) -> Result<CaptureResult, GatewayError>;

    /// Returns captured funds. Yields the gateway's refund ID.
    async fn refund(&self, intent_id: &str, amount: Money) -> Result<String, GatewayError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentRef, GatewayError> {
        (**self).create_intent(request).await
    }

    async fn capture(
        &self,
        intent_id: &str,
        idempotency_key: &IdempotencyKey,
    ) -> Result<CaptureResult, GatewayError> {
        (**self).capture(intent_id, idempotency_key).await
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<String, GatewayError> {
        (**self).refund(intent_id, amount).await
    }
}
