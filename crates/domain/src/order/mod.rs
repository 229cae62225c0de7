//! The order ledger and related types.

mod ledger;
mod model;

pub use ledger::OrderLedger;
pub use model::{NewPendingOrder, Order, OrderItem, OrderLine, compute_total};

use common::{OrderId, OrderStatus, PaymentStatus, ProductId};
use storage::StoreError;
use thiserror::Error;

use crate::inventory::InventoryError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity for {product_id} (must be greater than 0)")]
    InvalidQuantity { product_id: ProductId },

    /// The total does not fit in the money representation.
    #[error("Order total overflows")]
    TotalOverflow,

    /// An order was already written for the idempotency key.
    #[error("An order already exists for idempotency key {0}")]
    DuplicateIdempotencyKey(String),

    /// The order state machine does not allow the move.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// The payment state machine does not allow the move.
    #[error("Invalid payment status transition: {from} -> {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// The payment reference does not belong to this order.
    #[error("Order {order_id} is linked to payment {expected}, not {received}")]
    PaymentRefMismatch {
        order_id: OrderId,
        expected: String,
        received: String,
    },

    /// Another order already uses the gateway reference.
    #[error("Payment reference {0} belongs to another order")]
    PaymentRefInUse(String),

    /// The order is past the point where a payment can be attached.
    #[error("Order {order_id} is not awaiting payment (status {status}, payment {payment_status})")]
    NotAwaitingPayment {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    /// A capture was reported for an order that was already cancelled.
    #[error("Payment captured for cancelled order {0}")]
    PaidAfterCancellation(OrderId),

    /// Another writer kept winning the version race.
    #[error("Order {0} is being modified concurrently")]
    ConcurrentModification(OrderId),

    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    /// An error occurred in the storage layer.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
