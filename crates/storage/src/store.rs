use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, OrderId, ProductId, ReservationId, SessionId};

use crate::{
    CartRecord, NewOrder, OrderPage, OrderQuery, OrderRecord, OrderUpdate, PaymentEventRecord,
    Product, ReservationRecord, ReserveOutcome, Result, StockLine, TransitionOutcome,
};

/// Catalog read API plus the stock primitives.
///
/// Stock is only ever changed through conditional updates; no implementation
/// may read a quantity and write back a computed value. Both stores build
/// `ReservationStore::reserve` and `release` from the same decrement and
/// increment they expose here; the standalone methods are the surface for
/// catalog management (restocks and manual corrections).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Returns the product, or None if the catalog does not know it.
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>>;

    /// Decrements stock by `quantity` only if at least that much is left.
    ///
    /// Returns false (and changes nothing) if stock is insufficient or the
    /// product is unknown.
    async fn decrement_stock(&self, id: &ProductId, quantity: u32) -> Result<bool>;

    /// Adds `quantity` back to the product's stock.
    async fn increment_stock(&self, id: &ProductId, quantity: u32) -> Result<()>;

    /// Creates the product or replaces its name, price and stock.
    async fn upsert_product(&self, product: Product) -> Result<()>;
}

/// Durable reservations over catalog stock.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Atomically decrements every line and records a `Reserved` reservation.
    ///
    /// Either all lines are decremented or none are. If a reservation that is
    /// not `Released` already exists for `key`, it is returned as
    /// [`ReserveOutcome::Existing`] and stock is left untouched.
    async fn reserve(
        &self,
        id: ReservationId,
        key: &IdempotencyKey,
        lines: &[StockLine],
    ) -> Result<ReserveOutcome>;

    /// Moves `Reserved -> Released` and restores the stock in one atomic unit.
    async fn release(&self, id: ReservationId) -> Result<TransitionOutcome>;

    /// Moves `Reserved -> Committed`; stock stays decremented for good.
    async fn commit(&self, id: ReservationId) -> Result<TransitionOutcome>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>>;
}

/// Orders and their items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Writes the order and all its items atomically.
    ///
    /// Fails with `Duplicate` if an order already uses the idempotency key.
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord>;

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>>;

    async fn find_order_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderRecord>>;

    async fn find_order_by_payment_ref(&self, external_ref: &str) -> Result<Option<OrderRecord>>;

    /// Compare-and-swap write of the mutable columns.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version moved on.
    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> Result<OrderRecord>;

    async fn list_orders(&self, query: OrderQuery) -> Result<OrderPage>;
}

/// The append-only payment event log.
#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    /// Appends an event.
    ///
    /// Returns false if an event with the same external event ID was already
    /// recorded; the log is left unchanged in that case.
    async fn append_payment_event(&self, event: PaymentEventRecord) -> Result<bool>;

    /// Events for an order, oldest first.
    async fn payment_events(&self, order_id: OrderId) -> Result<Vec<PaymentEventRecord>>;
}

/// Session-scoped cart snapshots with expiry.
#[async_trait]
pub trait CartSessionStore: Send + Sync {
    /// Loads the session's cart; expired carts are treated as absent.
    async fn load_cart(&self, session_id: &SessionId, now: DateTime<Utc>)
    -> Result<Option<CartRecord>>;

    async fn save_cart(&self, cart: CartRecord) -> Result<()>;

    async fn delete_cart(&self, session_id: &SessionId) -> Result<()>;
}

/// Everything the checkout system persists.
pub trait Storage:
    CatalogStore
    + ReservationStore
    + OrderStore
    + PaymentEventStore
    + CartSessionStore
    + Clone
    + 'static
{
}

impl<T> Storage for T where
    T: CatalogStore
        + ReservationStore
        + OrderStore
        + PaymentEventStore
        + CartSessionStore
        + Clone
        + 'static
{
}
