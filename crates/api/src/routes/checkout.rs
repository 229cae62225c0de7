//! Checkout endpoints.

use std::sync::Arc;

use ::checkout::{CheckoutReceipt, CheckoutRequest, PaymentOutcome};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{IdempotencyKey, PaymentMethod};
use serde::{Deserialize, Serialize};
use storage::{ShippingAddress, Storage};

use super::orders::OrderResponse;
use super::{AppState, Caller, load_visible, session_id};
use crate::error::ApiError;

/// Alternative to the body field for clients that send keys as a header.
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Deserialize)]
pub struct CheckoutBody {
    /// Client-chosen request ID; retries must reuse it.
    pub idempotency_key: Option<String>,
    pub shipping_address: ShippingAddress,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    pub email: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Card
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub payment: PaymentOutcome,
    pub resumed: bool,
}

impl From<CheckoutReceipt> for CheckoutResponse {
    fn from(receipt: CheckoutReceipt) -> Self {
        Self {
            order: receipt.order.into(),
            payment: receipt.payment,
            resumed: receipt.resumed,
        }
    }
}

/// POST /checkout — turn the session cart into an order and charge it.
///
/// Answers 201 when this call created the order and 200 when it resumed
/// one created by an earlier attempt with the same key.
#[tracing::instrument(skip(state, headers, body))]
pub async fn create<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let session = session_id(&headers)?;
    let caller = Caller::from_headers(&headers, &state)?;

    let key = body
        .idempotency_key
        .or_else(|| {
            headers
                .get(IDEMPOTENCY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();

    let receipt = state
        .checkout
        .checkout(CheckoutRequest {
            session_id: session,
            idempotency_key: IdempotencyKey::new(key),
            user_id: caller.user_id,
            email: body.email,
            shipping_address: body.shipping_address,
            payment_method: body.payment_method,
        })
        .await?;

    let status = if receipt.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt.into())))
}

/// POST /checkout/{order_id}/confirm — capture a wallet payment the buyer
/// approved.
#[tracing::instrument(skip(state, headers))]
pub async fn confirm<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let session = session_id(&headers)?;
    let caller = Caller::from_headers(&headers, &state)?;
    let order = load_visible(&state, &caller, &order_id).await?;

    let receipt = state.checkout.confirm_payment(&session, order.id).await?;
    Ok(Json(receipt.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_defaults_to_card() {
        let body: CheckoutBody = serde_json::from_str(
            r#"{
                "idempotency_key": "k1",
                "shipping_address": {
                    "recipient": "Ada",
                    "line1": "1 Main St",
                    "city": "Springfield",
                    "postal_code": "12345",
                    "country": "US"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(body.payment_method, PaymentMethod::Card);
        assert_eq!(body.idempotency_key.as_deref(), Some("k1"));
        assert!(body.email.is_none());
    }
}
