//! Payment gateway webhook endpoint.

use std::sync::Arc;

use ::checkout::{SIGNATURE_HEADER, WebhookOutcome};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use storage::Storage;

use super::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct WebhookResponse {
    pub outcome: WebhookOutcome,
}

/// POST /webhooks/payments — signed delivery from the payment gateway.
///
/// The raw body is verified before it is parsed, so it is taken as bytes.
#[tracing::instrument(skip(state, headers, body))]
pub async fn payments<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.checkout.handle_webhook(signature, &body).await?;
    Ok(Json(WebhookResponse { outcome }))
}
