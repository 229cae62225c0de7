//! Admin status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use common::{OrderStatus, PaymentStatus};
use serde::Deserialize;
use storage::Storage;

use super::orders::OrderResponse;
use super::{AppState, Caller, parse_order_id};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
}

/// PUT /admin/orders/{id}/status — move an order along its lifecycle.
#[tracing::instrument(skip(state, headers, req), fields(status = %req.status))]
pub async fn update_status<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    Caller::from_headers(&headers, &state)?.require_admin()?;
    let order_id = parse_order_id(&id)?;

    let order = state
        .checkout
        .admin_update_status(order_id, req.status)
        .await?;
    Ok(Json(order.into()))
}

/// PUT /admin/orders/{id}/payment-status — record a payment status change.
#[tracing::instrument(skip(state, headers, req), fields(payment_status = %req.payment_status))]
pub async fn update_payment_status<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdatePaymentStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    Caller::from_headers(&headers, &state)?.require_admin()?;
    let order_id = parse_order_id(&id)?;

    let order = state
        .checkout
        .admin_update_payment_status(order_id, req.payment_status)
        .await?;
    Ok(Json(order.into()))
}
