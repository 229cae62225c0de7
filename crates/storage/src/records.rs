//! Rows persisted by the storage layer.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{
    IdempotencyKey, Money, OrderId, OrderStatus, ParseStatusError, PaymentMethod, PaymentStatus,
    ProductId, ReservationId, ReservationState, SessionId, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog view of a product: authoritative price and current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock_quantity: u32,
}

impl Product {
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        stock_quantity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            stock_quantity,
        }
    }
}

/// A quantity of one product, the unit of reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl StockLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }

    /// Folds duplicate products into one line each, ordered by product ID.
    ///
    /// Stores lock product rows in this order, so concurrent batches touching
    /// the same products never wait on each other in a cycle.
    pub fn merge(lines: impl IntoIterator<Item = StockLine>) -> Vec<StockLine> {
        let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
        for line in lines {
            *merged.entry(line.product_id).or_insert(0) += line.quantity;
        }
        merged
            .into_iter()
            .map(|(product_id, quantity)| StockLine {
                product_id,
                quantity,
            })
            .collect()
    }
}

/// A persisted reservation and its state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: ReservationId,
    pub idempotency_key: IdempotencyKey,
    pub lines: Vec<StockLine>,
    pub state: ReservationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an all-or-nothing batch reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Every line was decremented and the reservation recorded.
    Reserved(ReservationRecord),

    /// A live reservation already exists for the idempotency key; nothing
    /// was decremented.
    Existing(ReservationRecord),

    /// The named product could not cover the request; nothing was decremented.
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// The named product does not exist; nothing was decremented.
    UnknownProduct(ProductId),
}

/// Result of moving a reservation out of `Reserved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition happened now.
    Applied(ReservationRecord),

    /// The reservation was already in the requested state.
    Unchanged(ReservationRecord),

    /// The reservation is in the other terminal state.
    Conflict(ReservationRecord),
}

/// Postal address an order ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

/// A line of an order about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

/// An order and its items, written in one atomic unit.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    /// The cart session that placed the order.
    pub session_id: SessionId,
    pub email: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: ReservationId,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub currency: String,
    pub total: Money,
    pub items: Vec<NewOrderItem>,
}

/// A persisted order line. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRecord {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

/// A persisted order with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub user_id: Option<UserId>,
    pub session_id: SessionId,
    pub email: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub reservation_id: ReservationId,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub total: Money,
    pub currency: String,
    pub external_payment_ref: Option<String>,
    pub external_capture_id: Option<String>,
    /// Incremented on every write; used for compare-and-swap updates.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemRecord>,
}

/// The mutable columns of an order, written only if the stored version still
/// equals `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub expected_version: i64,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub external_payment_ref: Option<String>,
    pub external_capture_id: Option<String>,
}

impl OrderUpdate {
    /// Starts an update carrying the record's current values.
    pub fn from_record(record: &OrderRecord) -> Self {
        Self {
            expected_version: record.version,
            status: record.status,
            payment_status: record.payment_status,
            external_payment_ref: record.external_payment_ref.clone(),
            external_capture_id: record.external_capture_id.clone(),
        }
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn payment_status(mut self, payment_status: PaymentStatus) -> Self {
        self.payment_status = payment_status;
        self
    }

    pub fn external_payment_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_payment_ref = Some(external_ref.into());
        self
    }

    pub fn external_capture_id(mut self, capture_id: Option<String>) -> Self {
        self.external_capture_id = capture_id;
        self
    }
}

/// What happened to an order's payment, in the append-only payment log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    IntentCreated,
    IntentFailed,
    CaptureSucceeded,
    CaptureDeclined,
    CaptureFailed,
    CaptureTimedOut,
    WebhookReceived,
    Refunded,
    RefundFailed,
    LatePaymentOnCancelledOrder,
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentEventKind::IntentCreated => "intent_created",
            PaymentEventKind::IntentFailed => "intent_failed",
            PaymentEventKind::CaptureSucceeded => "capture_succeeded",
            PaymentEventKind::CaptureDeclined => "capture_declined",
            PaymentEventKind::CaptureFailed => "capture_failed",
            PaymentEventKind::CaptureTimedOut => "capture_timed_out",
            PaymentEventKind::WebhookReceived => "webhook_received",
            PaymentEventKind::Refunded => "refunded",
            PaymentEventKind::RefundFailed => "refund_failed",
            PaymentEventKind::LatePaymentOnCancelledOrder => "late_payment_on_cancelled_order",
        }
    }
}

impl std::fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentEventKind {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "intent_created" => PaymentEventKind::IntentCreated,
            "intent_failed" => PaymentEventKind::IntentFailed,
            "capture_succeeded" => PaymentEventKind::CaptureSucceeded,
            "capture_declined" => PaymentEventKind::CaptureDeclined,
            "capture_failed" => PaymentEventKind::CaptureFailed,
            "capture_timed_out" => PaymentEventKind::CaptureTimedOut,
            "webhook_received" => PaymentEventKind::WebhookReceived,
            "refunded" => PaymentEventKind::Refunded,
            "refund_failed" => PaymentEventKind::RefundFailed,
            "late_payment_on_cancelled_order" => PaymentEventKind::LatePaymentOnCancelledOrder,
            _ => {
                return Err(ParseStatusError {
                    kind: "payment event kind",
                    value: s.to_string(),
                });
            }
        };
        Ok(kind)
    }
}

/// One entry of the append-only payment event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEventRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub kind: PaymentEventKind,
    /// Gateway intent/order reference the event concerns.
    pub external_ref: Option<String>,
    /// Gateway-assigned event ID; unique, used to drop webhook replays.
    pub external_event_id: Option<String>,
    pub amount: Option<Money>,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl PaymentEventRecord {
    pub fn new(order_id: OrderId, kind: PaymentEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            kind,
            external_ref: None,
            external_event_id: None,
            amount: None,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }

    pub fn external_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.external_event_id = Some(event_id.into());
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One product in a session cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price seen when the item was added. Advisory only.
    pub unit_price_snapshot: Money,
}

/// Serialized cart of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRecord {
    pub session_id: SessionId,
    pub items: Vec<CartLine>,
    pub expires_at: DateTime<Utc>,
}

impl CartRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_folds_duplicates_and_sorts() {
        let merged = StockLine::merge(vec![
            StockLine::new("P2", 1),
            StockLine::new("P1", 2),
            StockLine::new("P2", 4),
        ]);
        assert_eq!(
            merged,
            vec![StockLine::new("P1", 2), StockLine::new("P2", 5)]
        );
    }

    #[test]
    fn payment_event_kind_parses_its_own_name() {
        let kind = PaymentEventKind::LatePaymentOnCancelledOrder;
        assert_eq!(kind.as_str().parse::<PaymentEventKind>().unwrap(), kind);
        assert!("nope".parse::<PaymentEventKind>().is_err());
    }

    #[test]
    fn cart_expiry_is_inclusive() {
        let now = Utc::now();
        let cart = CartRecord {
            session_id: SessionId::new("s"),
            items: vec![],
            expires_at: now,
        };
        assert!(cart.is_expired(now));
        assert!(!cart.is_expired(now - chrono::Duration::seconds(1)));
    }
}
