//! Order read and cancel endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use common::{OrderStatus, PaymentStatus};
use domain::Order;
use serde::{Deserialize, Serialize};
use storage::{OrderQuery, ShippingAddress, Storage};

use super::{AppState, Caller, load_visible};
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: String,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub currency: String,
    pub payment_ref: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub price_at_purchase_cents: i64,
}

#[derive(Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            user_id: order.user_id.map(|u| u.to_string()),
            email: order.email,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method.to_string(),
            shipping_address: order.shipping_address,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    price_at_purchase_cents: item.price_at_purchase.cents(),
                })
                .collect(),
            total_cents: order.total.cents(),
            currency: order.currency,
            payment_ref: order.external_payment_ref,
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

// -- Handlers --

/// GET /orders — the caller's orders, or every order for an admin.
#[tracing::instrument(skip(state, headers))]
pub async fn list<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let caller = Caller::from_headers(&headers, &state)?;

    let mut query = match (caller.is_admin, caller.user_id) {
        (true, _) => OrderQuery::new(),
        (false, Some(user_id)) => OrderQuery::for_user(user_id),
        (false, None) => {
            return Err(ApiError::Forbidden(
                "Sign in to list orders".to_string(),
            ));
        }
    };
    if let Some(status) = params.status {
        query = query.status(status);
    }
    if let Some(limit) = params.limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    let page = state.checkout.ledger().list_orders(query).await?;

    Ok(Json(OrderListResponse {
        orders: page.orders.into_iter().map(OrderResponse::from).collect(),
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = Caller::from_headers(&headers, &state)?;
    let order = load_visible(&state, &caller, &id).await?;
    Ok(Json(order.into()))
}

/// POST /orders/{id}/cancel — cancel a PENDING order.
#[tracing::instrument(skip(state, headers))]
pub async fn cancel<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let caller = Caller::from_headers(&headers, &state)?;
    let order = load_visible(&state, &caller, &id).await?;
    let order = state.checkout.cancel_order(order.id).await?;
    Ok(Json(order.into()))
}
