//! Session carts.

mod model;
mod service;

pub use model::{Cart, CartItem};
pub use service::{CartStore, DEFAULT_CART_TTL};

use common::ProductId;
use storage::StoreError;
use thiserror::Error;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity must be a positive integer.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// The product is not in the cart.
    #[error("Item not found in cart: {product_id}")]
    ItemNotFound { product_id: ProductId },

    /// The catalog does not know the product.
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// An error occurred in the storage layer.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
