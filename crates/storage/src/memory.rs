use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    IdempotencyKey, OrderId, ProductId, ReservationId, ReservationState, SessionId,
};
use tokio::sync::RwLock;

use crate::{
    CartRecord, NewOrder, OrderItemRecord, OrderPage, OrderQuery, OrderRecord, OrderUpdate,
    PaymentEventRecord, Product, ReservationRecord, ReserveOutcome, Result, StockLine,
    StoreError, TransitionOutcome,
    store::{CartSessionStore, CatalogStore, OrderStore, PaymentEventStore, ReservationStore},
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    reservations: HashMap<ReservationId, ReservationRecord>,
    orders: HashMap<OrderId, OrderRecord>,
    /// Order IDs in insertion order, for newest-first listing.
    order_sequence: Vec<OrderId>,
    payment_events: Vec<PaymentEventRecord>,
    carts: HashMap<SessionId, CartRecord>,
}

impl MemoryState {
    fn active_reservation_for(&self, key: &IdempotencyKey) -> Option<&ReservationRecord> {
        self.reservations
            .values()
            .find(|r| &r.idempotency_key == key && r.state != ReservationState::Released)
    }

    /// Conditional decrement; every reservation is built from it.
    fn take_stock(&mut self, id: &ProductId, quantity: u32) -> bool {
        match self.products.get_mut(id) {
            Some(product) if product.stock_quantity >= quantity => {
                product.stock_quantity -= quantity;
                true
            }
            _ => false,
        }
    }

    /// Returns false if the product is unknown.
    fn return_stock(&mut self, id: &ProductId, quantity: u32) -> bool {
        match self.products.get_mut(id) {
            Some(product) => {
                product.stock_quantity += quantity;
                true
            }
            None => false,
        }
    }
}

/// In-memory storage implementation for testing and single-process use.
///
/// One lock guards all tables, so every trait method is atomic exactly like
/// a single database transaction. The lock is never held across an await.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_order_inserts: Arc<AtomicBool>,
    fail_releases: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with products.
    pub async fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for product in products {
                state.products.insert(product.id.clone(), product);
            }
        }
        store
    }

    /// Makes every `insert_order` fail with `Unavailable` while set.
    pub fn set_fail_on_order_insert(&self, fail: bool) {
        self.fail_order_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes every reservation `release` fail with `Unavailable` while set.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Returns the current stock of a product.
    pub async fn stock_of(&self, id: &ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(id)
            .map(|p| p.stock_quantity)
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of reservations currently in `state`.
    pub async fn reservation_count(&self, state: ReservationState) -> usize {
        self.state
            .read()
            .await
            .reservations
            .values()
            .filter(|r| r.state == state)
            .count()
    }

    async fn transition(
        &self,
        id: ReservationId,
        target: ReservationState,
    ) -> Result<TransitionOutcome> {
        let mut state = self.state.write().await;

        let current = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                key: id.to_string(),
            })?;

        if current.state == target {
            return Ok(TransitionOutcome::Unchanged(current));
        }
        if current.state != ReservationState::Reserved {
            return Ok(TransitionOutcome::Conflict(current));
        }

        if target == ReservationState::Released {
            for line in &current.lines {
                state.return_stock(&line.product_id, line.quantity);
            }
        }

        let mut updated = current;
        updated.state = target;
        updated.updated_at = Utc::now();
        state.reservations.insert(id, updated.clone());
        Ok(TransitionOutcome::Applied(updated))
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(id).cloned())
    }

    async fn decrement_stock(&self, id: &ProductId, quantity: u32) -> Result<bool> {
        Ok(self.state.write().await.take_stock(id, quantity))
    }

    async fn increment_stock(&self, id: &ProductId, quantity: u32) -> Result<()> {
        if !self.state.write().await.return_stock(id, quantity) {
            return Err(StoreError::NotFound {
                entity: "product",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_product(&self, product: Product) -> Result<()> {
        self.state
            .write()
            .await
            .products
            .insert(product.id.clone(), product);
        Ok(())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn reserve(
        &self,
        id: ReservationId,
        key: &IdempotencyKey,
        lines: &[StockLine],
    ) -> Result<ReserveOutcome> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.active_reservation_for(key) {
            return Ok(ReserveOutcome::Existing(existing.clone()));
        }

        // Check every line before touching any of them.
        for line in lines {
            match state.products.get(&line.product_id) {
                None => return Ok(ReserveOutcome::UnknownProduct(line.product_id.clone())),
                Some(product) if product.stock_quantity < line.quantity => {
                    return Ok(ReserveOutcome::InsufficientStock {
                        product_id: line.product_id.clone(),
                        requested: line.quantity,
                        available: product.stock_quantity,
                    });
                }
                Some(_) => {}
            }
        }

        for line in lines {
            let taken = state.take_stock(&line.product_id, line.quantity);
            debug_assert!(taken, "stock was checked under the same lock");
        }

        let now = Utc::now();
        let record = ReservationRecord {
            id,
            idempotency_key: key.clone(),
            lines: lines.to_vec(),
            state: ReservationState::Reserved,
            created_at: now,
            updated_at: now,
        };
        state.reservations.insert(id, record.clone());

        Ok(ReserveOutcome::Reserved(record))
    }

    async fn release(&self, id: ReservationId) -> Result<TransitionOutcome> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "reservation table is not accepting writes".to_string(),
            ));
        }
        self.transition(id, ReservationState::Released).await
    }

    async fn commit(&self, id: ReservationId) -> Result<TransitionOutcome> {
        self.transition(id, ReservationState::Committed).await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<ReservationRecord>> {
        Ok(self.state.read().await.reservations.get(&id).cloned())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: NewOrder) -> Result<OrderRecord> {
        if self.fail_order_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "order table is not accepting writes".to_string(),
            ));
        }

        let mut state = self.state.write().await;

        if state
            .orders
            .values()
            .any(|o| o.idempotency_key == order.idempotency_key)
        {
            return Err(StoreError::Duplicate {
                entity: "order idempotency key",
                key: order.idempotency_key.to_string(),
            });
        }

        let now = Utc::now();
        let record = OrderRecord {
            id: order.id,
            user_id: order.user_id,
            session_id: order.session_id,
            email: order.email,
            idempotency_key: order.idempotency_key,
            reservation_id: order.reservation_id,
            status: Default::default(),
            payment_status: Default::default(),
            payment_method: order.payment_method,
            shipping_address: order.shipping_address,
            total: order.total,
            currency: order.currency,
            external_payment_ref: None,
            external_capture_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemRecord {
                    order_id: order.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_purchase: item.price_at_purchase,
                })
                .collect(),
        };

        state.orders.insert(record.id, record.clone());
        state.order_sequence.push(record.id);
        Ok(record)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<OrderRecord>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| &o.idempotency_key == key)
            .cloned())
    }

    async fn find_order_by_payment_ref(&self, external_ref: &str) -> Result<Option<OrderRecord>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.external_payment_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn update_order(&self, id: OrderId, update: OrderUpdate) -> Result<OrderRecord> {
        let mut state = self.state.write().await;

        if let Some(new_ref) = update.external_payment_ref.as_deref()
            && state
                .orders
                .values()
                .any(|o| o.id != id && o.external_payment_ref.as_deref() == Some(new_ref))
        {
            return Err(StoreError::Duplicate {
                entity: "external payment ref",
                key: new_ref.to_string(),
            });
        }

        let order = state.orders.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            key: id.to_string(),
        })?;

        if order.version != update.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                order_id: id,
                expected: update.expected_version,
                actual: order.version,
            });
        }

        order.status = update.status;
        order.payment_status = update.payment_status;
        order.external_payment_ref = update.external_payment_ref;
        order.external_capture_id = update.external_capture_id;
        order.version += 1;
        order.updated_at = Utc::now();

        Ok(order.clone())
    }

    async fn list_orders(&self, query: OrderQuery) -> Result<OrderPage> {
        let state = self.state.read().await;

        let matching: Vec<&OrderRecord> = state
            .order_sequence
            .iter()
            .rev()
            .filter_map(|id| state.orders.get(id))
            .filter(|o| query.matches(o))
            .collect();

        let limit = query.effective_limit();
        let offset = query.effective_offset();

        Ok(OrderPage {
            total: matching.len(),
            orders: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            limit,
            offset,
        })
    }
}

#[async_trait]
impl PaymentEventStore for InMemoryStore {
    async fn append_payment_event(&self, event: PaymentEventRecord) -> Result<bool> {
        let mut state = self.state.write().await;

        if let Some(event_id) = event.external_event_id.as_deref()
            && state
                .payment_events
                .iter()
                .any(|e| e.external_event_id.as_deref() == Some(event_id))
        {
            return Ok(false);
        }

        state.payment_events.push(event);
        Ok(true)
    }

    async fn payment_events(&self, order_id: OrderId) -> Result<Vec<PaymentEventRecord>> {
        Ok(self
            .state
            .read()
            .await
            .payment_events
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CartSessionStore for InMemoryStore {
    async fn load_cart(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<CartRecord>> {
        let mut state = self.state.write().await;
        match state.carts.get(session_id) {
            Some(cart) if cart.is_expired(now) => {
                state.carts.remove(session_id);
                Ok(None)
            }
            Some(cart) => Ok(Some(cart.clone())),
            None => Ok(None),
        }
    }

    async fn save_cart(&self, cart: CartRecord) -> Result<()> {
        self.state
            .write()
            .await
            .carts
            .insert(cart.session_id.clone(), cart);
        Ok(())
    }

    async fn delete_cart(&self, session_id: &SessionId) -> Result<()> {
        self.state.write().await.carts.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewOrderItem, PaymentEventKind, ShippingAddress};
    use common::{Money, OrderStatus, PaymentMethod, PaymentStatus};

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient: "Ada".to_string(),
            line1: "1 Main St".to_string(),
            line2: None,
            city: "Springfield".to_string(),
            region: None,
            postal_code: "12345".to_string(),
            country: "US".to_string(),
        }
    }

    fn new_order(key: &str) -> NewOrder {
        NewOrder {
            id: OrderId::new(),
            user_id: None,
            session_id: SessionId::new("s1"),
            email: Some("ada@example.com".to_string()),
            idempotency_key: IdempotencyKey::new(key),
            reservation_id: ReservationId::new(),
            payment_method: PaymentMethod::Card,
            shipping_address: address(),
            currency: "USD".to_string(),
            total: Money::from_cents(3000),
            items: vec![NewOrderItem {
                product_id: ProductId::new("P1"),
                quantity: 3,
                price_at_purchase: Money::from_cents(1000),
            }],
        }
    }

    async fn seeded() -> InMemoryStore {
        InMemoryStore::with_products([
            Product::new("P1", "Widget", Money::from_cents(1000), 5),
            Product::new("P2", "Gadget", Money::from_cents(2500), 1),
        ])
        .await
    }

    #[tokio::test]
    async fn conditional_decrement_refuses_to_go_negative() {
        let store = seeded().await;
        let p2 = ProductId::new("P2");

        assert!(store.decrement_stock(&p2, 1).await.unwrap());
        assert!(!store.decrement_stock(&p2, 1).await.unwrap());
        assert_eq!(store.stock_of(&p2).await, Some(0));
        assert!(!store.decrement_stock(&ProductId::new("nope"), 1).await.unwrap());

        store.increment_stock(&p2, 3).await.unwrap();
        assert_eq!(store.stock_of(&p2).await, Some(3));
        assert!(matches!(
            store.increment_stock(&ProductId::new("nope"), 1).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reserve_is_all_or_nothing() {
        let store = seeded().await;
        let lines = vec![StockLine::new("P1", 2), StockLine::new("P2", 2)];

        let outcome = store
            .reserve(ReservationId::new(), &IdempotencyKey::new("k"), &lines)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ReserveOutcome::InsufficientStock {
                product_id: ProductId::new("P2"),
                requested: 2,
                available: 1,
            }
        );
        assert_eq!(store.stock_of(&ProductId::new("P1")).await, Some(5));
        assert_eq!(store.stock_of(&ProductId::new("P2")).await, Some(1));
    }

    #[tokio::test]
    async fn reserve_same_key_returns_existing_without_decrementing() {
        let store = seeded().await;
        let key = IdempotencyKey::new("k");
        let lines = vec![StockLine::new("P1", 2)];

        let first = store.reserve(ReservationId::new(), &key, &lines).await.unwrap();
        let second = store.reserve(ReservationId::new(), &key, &lines).await.unwrap();

        let ReserveOutcome::Reserved(first) = first else {
            panic!("expected a fresh reservation");
        };
        assert_eq!(second, ReserveOutcome::Existing(first));
        assert_eq!(store.stock_of(&ProductId::new("P1")).await, Some(3));
    }

    #[tokio::test]
    async fn release_restores_stock_once() {
        let store = seeded().await;
        let id = ReservationId::new();
        store
            .reserve(id, &IdempotencyKey::new("k"), &[StockLine::new("P1", 4)])
            .await
            .unwrap();

        assert!(matches!(
            store.release(id).await.unwrap(),
            TransitionOutcome::Applied(_)
        ));
        assert!(matches!(
            store.release(id).await.unwrap(),
            TransitionOutcome::Unchanged(_)
        ));
        assert_eq!(store.stock_of(&ProductId::new("P1")).await, Some(5));
    }

    #[tokio::test]
    async fn committed_reservation_cannot_be_released() {
        let store = seeded().await;
        let id = ReservationId::new();
        store
            .reserve(id, &IdempotencyKey::new("k"), &[StockLine::new("P1", 1)])
            .await
            .unwrap();
        store.commit(id).await.unwrap();

        assert!(matches!(
            store.release(id).await.unwrap(),
            TransitionOutcome::Conflict(_)
        ));
        assert_eq!(store.stock_of(&ProductId::new("P1")).await, Some(4));
    }

    #[tokio::test]
    async fn released_key_can_reserve_again() {
        let store = seeded().await;
        let key = IdempotencyKey::new("k");
        let first = ReservationId::new();
        store
            .reserve(first, &key, &[StockLine::new("P1", 1)])
            .await
            .unwrap();
        store.release(first).await.unwrap();

        let again = store
            .reserve(ReservationId::new(), &key, &[StockLine::new("P1", 1)])
            .await
            .unwrap();
        assert!(matches!(again, ReserveOutcome::Reserved(_)));
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = seeded().await;
        store.insert_order(new_order("k")).await.unwrap();

        let err = store.insert_order(new_order("k")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn update_order_detects_stale_version() {
        let store = seeded().await;
        let order = store.insert_order(new_order("k")).await.unwrap();

        let paid = OrderUpdate::from_record(&order)
            .status(OrderStatus::Processing)
            .payment_status(PaymentStatus::Paid)
            .external_payment_ref("pi_1");
        let updated = store.update_order(order.id, paid.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        let err = store.update_order(order.id, paid).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ConcurrencyConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn payment_refs_are_unique_across_orders() {
        let store = seeded().await;
        let a = store.insert_order(new_order("a")).await.unwrap();
        let b = store.insert_order(new_order("b")).await.unwrap();

        store
            .update_order(a.id, OrderUpdate::from_record(&a).external_payment_ref("pi_1"))
            .await
            .unwrap();
        let err = store
            .update_order(b.id, OrderUpdate::from_record(&b).external_payment_ref("pi_1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn list_orders_pages_newest_first() {
        let store = seeded().await;
        let mut ids = Vec::new();
        for key in ["a", "b", "c"] {
            ids.push(store.insert_order(new_order(key)).await.unwrap().id);
        }

        let page = store
            .list_orders(OrderQuery::new().limit(2).offset(1))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let listed: Vec<OrderId> = page.orders.iter().map(|o| o.id).collect();
        assert_eq!(listed, vec![ids[1], ids[0]]);
    }

    #[tokio::test]
    async fn payment_event_replay_is_dropped() {
        let store = seeded().await;
        let order_id = OrderId::new();
        let event = || {
            PaymentEventRecord::new(order_id, PaymentEventKind::WebhookReceived)
                .external_event_id("evt_1")
        };

        assert!(store.append_payment_event(event()).await.unwrap());
        assert!(!store.append_payment_event(event()).await.unwrap());
        assert_eq!(store.payment_events(order_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_cart_is_absent() {
        let store = seeded().await;
        let session = SessionId::new("s1");
        let now = Utc::now();
        store
            .save_cart(CartRecord {
                session_id: session.clone(),
                items: vec![],
                expires_at: now - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();

        assert!(store.load_cart(&session, now).await.unwrap().is_none());
    }
}
