use common::{IdempotencyKey, ProductId, ReservationId, ReservationState};
use serde::Serialize;
use storage::{
    CatalogStore, ReservationStore, ReserveOutcome, StockLine, StoreError, TransitionOutcome,
};

use super::InventoryError;

/// Advisory stock check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: bool,
    pub current_stock: u32,
}

/// Proof that a batch of stock is held for one checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub id: ReservationId,
    pub lines: Vec<StockLine>,
    pub state: ReservationState,
    /// True if an earlier attempt with the same idempotency key made this
    /// reservation and no stock moved now.
    pub resumed: bool,
}

/// Guards product stock.
///
/// All stock changes go through the store's conditional primitives; the guard
/// never reads a quantity and writes back a computed value, and it holds no
/// lock of its own.
#[derive(Clone)]
pub struct InventoryGuard<S> {
    store: S,
}

impl<S> InventoryGuard<S>
where
    S: CatalogStore + ReservationStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Compares current stock with `quantity` without reserving anything.
    ///
    /// The answer can be stale by the time the caller acts on it.
    #[tracing::instrument(skip(self))]
    pub async fn check_availability(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Availability, InventoryError> {
        let product = self.store.get_product(product_id).await?.ok_or_else(|| {
            InventoryError::ProductNotFound {
                product_id: product_id.clone(),
            }
        })?;

        Ok(Availability {
            product_id: product_id.clone(),
            requested: quantity,
            available: product.stock_quantity >= quantity,
            current_stock: product.stock_quantity,
        })
    }

    /// Reserves every line or none of them.
    ///
    /// A retry with the same key returns the live reservation from the first
    /// attempt instead of decrementing stock again.
    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve(
        &self,
        key: &IdempotencyKey,
        lines: Vec<StockLine>,
    ) -> Result<ReservationToken, InventoryError> {
        if lines.is_empty() {
            return Err(InventoryError::EmptyReservation);
        }
        if let Some(line) = lines.iter().find(|l| l.quantity == 0) {
            return Err(InventoryError::InvalidQuantity {
                product_id: line.product_id.clone(),
            });
        }

        let lines = StockLine::merge(lines);
        let outcome = self
            .store
            .reserve(ReservationId::new(), key, &lines)
            .await?;

        match outcome {
            ReserveOutcome::Reserved(record) => {
                metrics::counter!("inventory_reservations_total").increment(1);
                tracing::info!(reservation_id = %record.id, "stock reserved");
                Ok(ReservationToken {
                    id: record.id,
                    lines: record.lines,
                    state: record.state,
                    resumed: false,
                })
            }
            ReserveOutcome::Existing(record) => {
                tracing::info!(reservation_id = %record.id, "reusing reservation for key");
                Ok(ReservationToken {
                    id: record.id,
                    lines: record.lines,
                    state: record.state,
                    resumed: true,
                })
            }
            ReserveOutcome::InsufficientStock {
                product_id,
                requested,
                available,
            } => {
                metrics::counter!("inventory_insufficient_stock_total").increment(1);
                tracing::info!(%product_id, requested, available, "insufficient stock");
                Err(InventoryError::InsufficientStock {
                    product_id,
                    requested,
                    available,
                })
            }
            ReserveOutcome::UnknownProduct(product_id) => {
                Err(InventoryError::ProductNotFound { product_id })
            }
        }
    }

    /// Gives the reserved stock back.
    ///
    /// Returns true if this call restored stock and false if the reservation
    /// had already been released.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, id: ReservationId) -> Result<bool, InventoryError> {
        match self.store.release(id).await.map_err(|e| not_found(e, id))? {
            TransitionOutcome::Applied(_) => {
                metrics::counter!("inventory_releases_total").increment(1);
                tracing::info!("reservation released");
                Ok(true)
            }
            TransitionOutcome::Unchanged(_) => Ok(false),
            TransitionOutcome::Conflict(_) => Err(InventoryError::AlreadyCommitted(id)),
        }
    }

    /// Makes the decrement final.
    ///
    /// Returns true if this call committed and false if it already was.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, id: ReservationId) -> Result<bool, InventoryError> {
        match self.store.commit(id).await.map_err(|e| not_found(e, id))? {
            TransitionOutcome::Applied(_) => Ok(true),
            TransitionOutcome::Unchanged(_) => Ok(false),
            TransitionOutcome::Conflict(_) => Err(InventoryError::AlreadyReleased(id)),
        }
    }
}

fn not_found(e: StoreError, id: ReservationId) -> InventoryError {
    match e {
        StoreError::NotFound { .. } => InventoryError::ReservationNotFound(id),
        other => InventoryError::Store(other),
    }
}
