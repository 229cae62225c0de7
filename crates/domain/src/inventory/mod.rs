//! Stock reservations.

mod guard;

pub use guard::{Availability, InventoryGuard, ReservationToken};

use common::{ProductId, ReservationId};
use storage::StoreError;
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// A reservation needs at least one line.
    #[error("Nothing to reserve")]
    EmptyReservation,

    /// Every line must reserve at least one unit.
    #[error("Invalid quantity for {product_id}: must be greater than 0")]
    InvalidQuantity { product_id: ProductId },

    /// The catalog does not know the product.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// The first product in the batch that could not cover its line.
    #[error("Insufficient stock for {product_id}: requested {requested}, only {available} available")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The stock of a committed reservation belongs to an order for good.
    #[error("Reservation {0} is already committed")]
    AlreadyCommitted(ReservationId),

    #[error("Reservation {0} was released")]
    AlreadyReleased(ReservationId),

    /// An error occurred in the storage layer.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
