use common::{
    IdempotencyKey, Money, PaymentMethod, ProductId, ReservationId, SessionId, UserId,
};
use storage::{NewOrderItem, OrderItemRecord, OrderRecord, ShippingAddress};

use super::OrderError;

/// A persisted order. Only the ledger changes it.
pub type Order = OrderRecord;

/// A persisted order line.
pub type OrderItem = OrderItemRecord;

/// A priced line going into a new order.
///
/// `unit_price` must be the authoritative catalog price, read server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// Input of [`OrderLedger::create_pending_order`](super::OrderLedger::create_pending_order).
#[derive(Debug, Clone)]
pub struct NewPendingOrder {
    pub user_id: Option<UserId>,
    pub session_id: SessionId,
    pub email: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: ReservationId,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub currency: String,
    pub lines: Vec<OrderLine>,
}

/// Sum of price × quantity over the lines, exact in cents.
pub fn compute_total(lines: &[OrderLine]) -> Result<Money, OrderError> {
    lines.iter().try_fold(Money::zero(), |total, line| {
        line.unit_price
            .checked_multiply(line.quantity)
            .and_then(|line_total| total.checked_add(line_total))
            .ok_or(OrderError::TotalOverflow)
    })
}

pub(crate) fn to_new_items(lines: &[OrderLine]) -> Result<Vec<NewOrderItem>, OrderError> {
    lines
        .iter()
        .map(|line| {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: line.product_id.clone(),
                });
            }
            Ok(NewOrderItem {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                price_at_purchase: line.unit_price,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_exact_in_cents() {
        let lines = vec![
            OrderLine::new("P1", 3, Money::from_cents(1999)),
            OrderLine::new("P2", 7, Money::from_cents(1)),
        ];
        assert_eq!(compute_total(&lines).unwrap(), Money::from_cents(5997 + 7));
        assert_eq!(compute_total(&[]).unwrap(), Money::zero());
    }

    #[test]
    fn total_overflow_is_an_error() {
        let lines = vec![OrderLine::new("P1", 2, Money::from_cents(i64::MAX))];
        assert!(matches!(
            compute_total(&lines),
            Err(OrderError::TotalOverflow)
        ));
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let lines = vec![OrderLine::new("P1", 0, Money::from_cents(100))];
        assert!(matches!(
            to_new_items(&lines),
            Err(OrderError::InvalidQuantity { .. })
        ));
    }
}
