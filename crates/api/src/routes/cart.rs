//! Session cart endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::ProductId;
use domain::Cart;
use serde::{Deserialize, Serialize};
use storage::Storage;

use super::{AppState, session_id};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub session_id: String,
    pub items: Vec<CartItemResponse>,
    /// Sum of the price snapshots; checkout re-prices from the catalog.
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct CartItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            session_id: cart.session_id().to_string(),
            subtotal_cents: cart.snapshot_subtotal().cents(),
            items: cart
                .items()
                .iter()
                .map(|item| CartItemResponse {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_snapshot.cents(),
                })
                .collect(),
        }
    }
}

// -- Handlers --

/// GET /cart — the session's cart, empty if none exists.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<CartResponse>, ApiError> {
    let session = session_id(&headers)?;
    let cart = state.checkout.carts().get(&session).await?;
    Ok(Json(cart.into()))
}

/// POST /cart/items — add a product or increase its quantity.
#[tracing::instrument(skip(state, headers, req))]
pub async fn add_item<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let session = session_id(&headers)?;
    let cart = state
        .checkout
        .carts()
        .add(&session, ProductId::new(req.product_id), req.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// PUT /cart/items/{product_id} — set a line's quantity.
#[tracing::instrument(skip(state, headers, req))]
pub async fn update_item<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let session = session_id(&headers)?;
    let cart = state
        .checkout
        .carts()
        .update_quantity(&session, &ProductId::new(product_id), req.quantity)
        .await?;
    Ok(Json(cart.into()))
}

/// DELETE /cart/items/{product_id}
#[tracing::instrument(skip(state, headers))]
pub async fn remove_item<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(product_id): Path<String>,
) -> Result<Json<CartResponse>, ApiError> {
    let session = session_id(&headers)?;
    let cart = state
        .checkout
        .carts()
        .remove(&session, &ProductId::new(product_id))
        .await?;
    Ok(Json(cart.into()))
}

/// DELETE /cart — empty the cart.
#[tracing::instrument(skip(state, headers))]
pub async fn clear<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session = session_id(&headers)?;
    state.checkout.carts().clear(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}
