use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{ProductId, SessionId};
use storage::{CartSessionStore, CatalogStore, StoreError};

use super::{Cart, CartError};

/// Seven days.
pub const DEFAULT_CART_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Service for managing session carts.
///
/// Every write persists the whole cart and pushes its expiry to `now + ttl`.
/// A session is assumed to issue its cart writes one at a time.
#[derive(Clone)]
pub struct CartStore<S> {
    store: S,
    ttl: chrono::Duration,
}

impl<S> CartStore<S>
where
    S: CartSessionStore + CatalogStore,
{
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7)),
        }
    }

    /// Returns the session's cart; empty if none exists or it expired.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, session_id: &SessionId) -> Result<Cart, CartError> {
        let record = self.store.load_cart(session_id, Utc::now()).await?;
        Ok(record
            .map(Cart::from_record)
            .unwrap_or_else(|| Cart::empty(session_id.clone())))
    }

    /// Adds a product, snapshotting its current catalog price.
    #[tracing::instrument(skip(self))]
    pub async fn add(
        &self,
        session_id: &SessionId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<Cart, CartError> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity { quantity });
        }

        let product = self
            .store
            .get_product(&product_id)
            .await?
            .ok_or_else(|| CartError::ProductNotFound {
                product_id: product_id.clone(),
            })?;

        let mut cart = self.get(session_id).await?;
        cart.add(product_id, quantity, product.price)?;
        self.save(&cart).await?;

        tracing::debug!(items = cart.items().len(), "cart item added");
        Ok(cart)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        session_id: &SessionId,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Cart, CartError> {
        let mut cart = self.get(session_id).await?;
        cart.update_quantity(product_id, quantity)?;
        self.save(&cart).await?;
        Ok(cart)
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove(
        &self,
        session_id: &SessionId,
        product_id: &ProductId,
    ) -> Result<Cart, CartError> {
        let mut cart = self.get(session_id).await?;
        cart.remove(product_id)?;
        self.save(&cart).await?;
        Ok(cart)
    }

    /// Empties the cart. Clearing an absent cart is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, session_id: &SessionId) -> Result<(), CartError> {
        self.store.delete_cart(session_id).await?;
        Ok(())
    }

    async fn save(&self, cart: &Cart) -> Result<(), StoreError> {
        if cart.is_empty() {
            return self.store.delete_cart(cart.session_id()).await;
        }
        let expires_at = Utc::now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store.save_cart(cart.to_record(expires_at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use storage::{InMemoryStore, Product};

    async fn carts() -> CartStore<InMemoryStore> {
        let store = InMemoryStore::with_products([
            Product::new("P1", "Widget", Money::from_cents(1000), 5),
            Product::new("P2", "Gadget", Money::from_cents(250), 5),
        ])
        .await;
        CartStore::new(store, DEFAULT_CART_TTL)
    }

    #[tokio::test]
    async fn missing_cart_reads_as_empty() {
        let carts = carts().await;
        let cart = carts.get(&SessionId::new("nobody")).await.unwrap();
        assert!(cart.is_empty());
    }

    #[tokio::test]
    async fn add_persists_with_catalog_price() {
        let carts = carts().await;
        let session = SessionId::new("s1");

        carts.add(&session, "P1".into(), 2).await.unwrap();
        carts.add(&session, "P1".into(), 1).await.unwrap();

        let cart = carts.get(&session).await.unwrap();
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
        assert_eq!(cart.items()[0].unit_price_snapshot, Money::from_cents(1000));
    }

    #[tokio::test]
    async fn add_unknown_product_fails() {
        let carts = carts().await;

        let err = carts
            .add(&SessionId::new("s1"), "nope".into(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::ProductNotFound { .. }));
    }

    #[tokio::test]
    async fn sessions_do_not_share_carts() {
        let carts = carts().await;
        carts.add(&SessionId::new("a"), "P1".into(), 1).await.unwrap();

        assert!(carts.get(&SessionId::new("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = InMemoryStore::with_products([Product::new(
            "P1",
            "Widget",
            Money::from_cents(1000),
            5,
        )])
        .await;
        let carts = CartStore::new(store, Duration::ZERO);
        let session = SessionId::new("s1");

        carts.add(&session, "P1".into(), 1).await.unwrap();
        assert!(carts.get(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let carts = carts().await;
        let session = SessionId::new("s1");
        carts.add(&session, "P2".into(), 4).await.unwrap();

        carts.clear(&session).await.unwrap();
        carts.clear(&session).await.unwrap();
        assert!(carts.get(&session).await.unwrap().is_empty());
    }
}
