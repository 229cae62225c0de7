//! Stock availability endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::ProductId;
use serde::{Deserialize, Serialize};
use storage::Storage;

use super::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub quantity: Option<u32>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub product_id: String,
    pub requested: u32,
    pub available: bool,
    pub current_stock: u32,
}

/// GET /inventory/{product_id}/availability?quantity=N
///
/// Advisory only; stock is not held until checkout reserves it.
#[tracing::instrument(skip(state))]
pub async fn availability<S: Storage>(
    State(state): State<Arc<AppState<S>>>,
    Path(product_id): Path<String>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let quantity = params.quantity.unwrap_or(1);
    if quantity == 0 {
        return Err(ApiError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let availability = state
        .checkout
        .inventory()
        .check_availability(&ProductId::new(product_id), quantity)
        .await?;

    Ok(Json(AvailabilityResponse {
        product_id: availability.product_id.to_string(),
        requested: availability.requested,
        available: availability.available,
        current_stock: availability.current_stock,
    }))
}
