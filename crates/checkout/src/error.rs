//! Checkout error types.

use common::{OrderId, OrderStatus, PaymentStatus, ProductId};
use domain::{CartError, InventoryError, OrderError};
use storage::StoreError;
use thiserror::Error;

use crate::webhook::WebhookError;

/// Every way a checkout or an order operation can end, other than success.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The session has nothing to buy.
    #[error("Cart is empty")]
    EmptyCart,

    /// Checkout requires a client-chosen idempotency key.
    #[error("Idempotency key is required")]
    MissingIdempotencyKey,

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    #[error("Item not found in cart: {product_id}")]
    ItemNotFound { product_id: ProductId },

    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: ProductId },

    /// Nothing was reserved.
    #[error("Insufficient stock for {product_id}: requested {requested}, only {available} available")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The order could not be written; its reservation was released.
    #[error("Order could not be created: {reason}")]
    OrderCreationFailed { reason: String },

    /// The gateway failed or declined. The order stays PENDING.
    #[error("Payment for order {order_id} could not be completed: {reason}")]
    PaymentGateway { order_id: OrderId, reason: String },

    /// The gateway did not answer in time. The order stays PENDING.
    #[error("Payment for order {order_id} timed out")]
    PaymentTimeout { order_id: OrderId },

    #[error("Refund for order {order_id} failed: {reason}")]
    RefundFailed { order_id: OrderId, reason: String },

    /// The idempotency key belongs to an attempt that cannot be resumed.
    #[error("Idempotency key {0} was used by a checkout that cannot be resumed")]
    IdempotencyConflict(String),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order was cancelled while its payment was in flight.
    #[error("Order {0} was cancelled")]
    OrderCancelled(OrderId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid payment status transition: {from} -> {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Order {order_id} is not awaiting payment (status {status}, payment {payment_status})")]
    NotAwaitingPayment {
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
    },

    #[error("Webhook rejected: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Cart error: {0}")]
    Cart(CartError),

    #[error("Inventory error: {0}")]
    Inventory(InventoryError),

    #[error("Order error: {0}")]
    Order(OrderError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Short label for the `checkout_failed` metric.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::MissingIdempotencyKey
            | CheckoutError::InvalidQuantity { .. }
            | CheckoutError::ItemNotFound { .. } => "validation",
            CheckoutError::ProductNotFound { .. } => "product_not_found",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::OrderCreationFailed { .. } => "order_creation_failed",
            CheckoutError::PaymentGateway { .. } => "payment_gateway",
            CheckoutError::PaymentTimeout { .. } => "payment_timeout",
            CheckoutError::RefundFailed { .. } => "refund_failed",
            CheckoutError::IdempotencyConflict(_) => "idempotency_conflict",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::OrderCancelled(_) => "order_cancelled",
            CheckoutError::InvalidStatusTransition { .. }
            | CheckoutError::InvalidPaymentTransition { .. }
            | CheckoutError::NotAwaitingPayment { .. } => "invalid_state",
            CheckoutError::Webhook(_) => "webhook",
            CheckoutError::Cart(_)
            | CheckoutError::Inventory(_)
            | CheckoutError::Order(_)
            | CheckoutError::Store(_) => "internal",
        }
    }

    /// Returns the order left PENDING by a failed payment, if any.
    pub fn pending_order(&self) -> Option<OrderId> {
        match self {
            CheckoutError::PaymentGateway { order_id, .. }
            | CheckoutError::PaymentTimeout { order_id } => Some(*order_id),
            _ => None,
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::InvalidQuantity { quantity } => CheckoutError::InvalidQuantity { quantity },
            CartError::ItemNotFound { product_id } => CheckoutError::ItemNotFound { product_id },
            CartError::ProductNotFound { product_id } => {
                CheckoutError::ProductNotFound { product_id }
            }
            CartError::Store(e) => CheckoutError::Store(e),
        }
    }
}

impl From<InventoryError> for CheckoutError {
    fn from(e: InventoryError) -> Self {
        match e {
            InventoryError::InsufficientStock {
                product_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            InventoryError::ProductNotFound { product_id } => {
                CheckoutError::ProductNotFound { product_id }
            }
            InventoryError::Store(e) => CheckoutError::Store(e),
            other => CheckoutError::Inventory(other),
        }
    }
}

impl From<OrderError> for CheckoutError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::NotFound(order_id) => CheckoutError::OrderNotFound(order_id),
            OrderError::PaidAfterCancellation(order_id) => CheckoutError::OrderCancelled(order_id),
            OrderError::InvalidStatusTransition { from, to } => {
                CheckoutError::InvalidStatusTransition { from, to }
            }
            OrderError::InvalidPaymentTransition { from, to } => {
                CheckoutError::InvalidPaymentTransition { from, to }
            }
            OrderError::NotAwaitingPayment {
                order_id,
                status,
                payment_status,
            } => CheckoutError::NotAwaitingPayment {
                order_id,
                status,
                payment_status,
            },
            OrderError::Inventory(e) => e.into(),
            OrderError::Store(e) => CheckoutError::Store(e),
            other => CheckoutError::Order(other),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_shortage_keeps_its_numbers() {
        let err: CheckoutError = InventoryError::InsufficientStock {
            product_id: ProductId::new("P1"),
            requested: 3,
            available: 2,
        }
        .into();

        assert!(matches!(
            err,
            CheckoutError::InsufficientStock { requested: 3, available: 2, .. }
        ));
        assert_eq!(err.reason(), "insufficient_stock");
    }

    #[test]
    fn nested_inventory_errors_are_unwrapped() {
        let err: CheckoutError = OrderError::Inventory(InventoryError::ProductNotFound {
            product_id: ProductId::new("P9"),
        })
        .into();
        assert!(matches!(err, CheckoutError::ProductNotFound { .. }));
    }

    #[test]
    fn only_payment_failures_carry_a_pending_order() {
        let order_id = OrderId::new();
        assert_eq!(
            CheckoutError::PaymentTimeout { order_id }.pending_order(),
            Some(order_id)
        );
        assert_eq!(CheckoutError::EmptyCart.pending_order(), None);
    }
}
