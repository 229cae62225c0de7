use chrono::{DateTime, Utc};
use common::{Money, ProductId, SessionId};
use serde::{Deserialize, Serialize};
use storage::{CartLine, CartRecord, StockLine};

use super::CartError;

/// One product in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    /// Price when the item was last added. Never used to charge.
    pub unit_price_snapshot: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money {
        self.unit_price_snapshot.multiply(self.quantity)
    }
}

/// A session's cart. Items keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    session_id: SessionId,
    items: Vec<CartItem>,
}

impl Cart {
    /// Creates an empty cart for the session.
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            items: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    /// Advisory subtotal from the price snapshots.
    pub fn snapshot_subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Adds `quantity` of a product, merging with an existing line.
    pub fn add(
        &mut self,
        product_id: ProductId,
        quantity: i64,
        unit_price: Money,
    ) -> Result<(), CartError> {
        let quantity = positive_quantity(quantity)?;

        match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(item) => {
                item.quantity = item.quantity.checked_add(quantity).ok_or(
                    CartError::InvalidQuantity {
                        quantity: i64::from(item.quantity) + i64::from(quantity),
                    },
                )?;
                item.unit_price_snapshot = unit_price;
            }
            None => self.items.push(CartItem {
                product_id,
                quantity,
                unit_price_snapshot: unit_price,
            }),
        }
        Ok(())
    }

    /// Replaces an item's quantity; zero or less removes it.
    pub fn update_quantity(&mut self, product_id: &ProductId, quantity: i64) -> Result<(), CartError> {
        let index = self.position(product_id)?;

        if quantity <= 0 {
            self.items.remove(index);
        } else {
            self.items[index].quantity = positive_quantity(quantity)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, product_id: &ProductId) -> Result<(), CartError> {
        let index = self.position(product_id)?;
        self.items.remove(index);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// The quantities to reserve, one line per product.
    pub fn stock_lines(&self) -> Vec<StockLine> {
        StockLine::merge(
            self.items
                .iter()
                .map(|i| StockLine::new(i.product_id.clone(), i.quantity)),
        )
    }

    pub(crate) fn from_record(record: CartRecord) -> Self {
        Self {
            session_id: record.session_id,
            items: record
                .items
                .into_iter()
                .map(|line| CartItem {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price_snapshot: line.unit_price_snapshot,
                })
                .collect(),
        }
    }

    pub(crate) fn to_record(&self, expires_at: DateTime<Utc>) -> CartRecord {
        CartRecord {
            session_id: self.session_id.clone(),
            items: self
                .items
                .iter()
                .map(|item| CartLine {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    unit_price_snapshot: item.unit_price_snapshot,
                })
                .collect(),
            expires_at,
        }
    }

    fn position(&self, product_id: &ProductId) -> Result<usize, CartError> {
        self.items
            .iter()
            .position(|i| &i.product_id == product_id)
            .ok_or_else(|| CartError::ItemNotFound {
                product_id: product_id.clone(),
            })
    }
}

fn positive_quantity(quantity: i64) -> Result<u32, CartError> {
    if quantity <= 0 {
        return Err(CartError::InvalidQuantity { quantity });
    }
    u32::try_from(quantity).map_err(|_| CartError::InvalidQuantity { quantity })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> Cart {
        Cart::empty(SessionId::new("s1"))
    }

    #[test]
    fn add_merges_duplicate_products() {
        let mut cart = cart();
        cart.add("P1".into(), 2, Money::from_cents(1000)).unwrap();
        cart.add("P2".into(), 1, Money::from_cents(500)).unwrap();
        cart.add("P1".into(), 3, Money::from_cents(1000)).unwrap();

        assert_eq!(cart.items().len(), 2);
        assert_eq!(cart.items()[0].product_id, ProductId::new("P1"));
        assert_eq!(cart.items()[0].quantity, 5);
        assert_eq!(cart.snapshot_subtotal(), Money::from_cents(5500));
    }

    #[test]
    fn add_rejects_non_positive_quantity() {
        let mut cart = cart();

        assert!(matches!(
            cart.add("P1".into(), 0, Money::from_cents(1)),
            Err(CartError::InvalidQuantity { quantity: 0 })
        ));
        assert!(matches!(
            cart.add("P1".into(), -2, Money::from_cents(1)),
            Err(CartError::InvalidQuantity { quantity: -2 })
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn update_to_zero_removes() {
        let mut cart = cart();
        cart.add("P1".into(), 2, Money::from_cents(1000)).unwrap();

        cart.update_quantity(&ProductId::new("P1"), 7).unwrap();
        assert_eq!(cart.items()[0].quantity, 7);

        cart.update_quantity(&ProductId::new("P1"), 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn update_of_missing_item_fails() {
        let mut cart = cart();

        let err = cart.update_quantity(&ProductId::new("P9"), 1).unwrap_err();
        assert!(matches!(err, CartError::ItemNotFound { .. }));
    }

    #[test]
    fn remove_and_clear() {
        let mut cart = cart();
        cart.add("P1".into(), 1, Money::from_cents(100)).unwrap();
        cart.add("P2".into(), 1, Money::from_cents(100)).unwrap();

        cart.remove(&ProductId::new("P1")).unwrap();
        assert!(cart.item(&ProductId::new("P1")).is_none());
        assert!(cart.remove(&ProductId::new("P1")).is_err());

        cart.clear();
        cart.clear();
        assert!(cart.is_empty());
    }
}
