use common::{IdempotencyKey, OrderId, OrderStatus, PaymentStatus, ReservationState};
use storage::{
    CatalogStore, NewOrder, OrderPage, OrderQuery, OrderStore, OrderUpdate, PaymentEventKind,
    PaymentEventRecord, PaymentEventStore, ReservationStore, StoreError,
};

use super::model::to_new_items;
use super::{NewPendingOrder, Order, OrderError, compute_total};
use crate::inventory::{InventoryError, InventoryGuard};

/// Optimistic writes retried this many times before giving up.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// The system of record for orders.
///
/// Orders are written once and afterwards change only through the state
/// machine checks in this type. Every change is a compare-and-swap on the
/// order's version; a lost race reloads the order and decides again.
#[derive(Clone)]
pub struct OrderLedger<S> {
    store: S,
    inventory: InventoryGuard<S>,
}

impl<S> OrderLedger<S>
where
    S: OrderStore + PaymentEventStore + CatalogStore + ReservationStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self {
            inventory: InventoryGuard::new(store.clone()),
            store,
        }
    }

    /// Writes a PENDING/PENDING order and its items in one atomic unit.
    ///
    /// The total is computed here from the line prices.
    #[tracing::instrument(skip(self, order), fields(idempotency_key = %order.idempotency_key))]
    pub async fn create_pending_order(&self, order: NewPendingOrder) -> Result<Order, OrderError> {
        if order.lines.is_empty() {
            return Err(OrderError::NoItems);
        }
        let items = to_new_items(&order.lines)?;
        let total = compute_total(&order.lines)?;

        let created = self
            .store
            .insert_order(NewOrder {
                id: OrderId::new(),
                user_id: order.user_id,
                session_id: order.session_id,
                email: order.email,
                idempotency_key: order.idempotency_key.clone(),
                reservation_id: order.reservation_id,
                payment_method: order.payment_method,
                shipping_address: order.shipping_address,
                currency: order.currency,
                total,
                items,
            })
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { .. } => {
                    OrderError::DuplicateIdempotencyKey(order.idempotency_key.to_string())
                }
                other => OrderError::Store(other),
            })?;

        tracing::info!(order_id = %created.id, total = %created.total, "pending order created");
        Ok(created)
    }

    /// Links the gateway's intent to the order before any capture.
    ///
    /// A new reference is accepted while the order is still unpaid. Attaching
    /// either a new or the same reference resets a failed payment of a
    /// PENDING order to pending; otherwise the same reference is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn attach_payment_ref(
        &self,
        order_id: OrderId,
        external_ref: &str,
    ) -> Result<Order, OrderError> {
        let mut new_ref = false;
        let (order, written) = self
            .transition(order_id, |order| {
                new_ref = false;
                if order.external_payment_ref.as_deref() == Some(external_ref) {
                    if order.status == OrderStatus::Pending
                        && order.payment_status == PaymentStatus::Failed
                    {
                        return Ok(Some(
                            OrderUpdate::from_record(order).payment_status(PaymentStatus::Pending),
                        ));
                    }
                    return Ok(None);
                }
                if order.status != OrderStatus::Pending
                    || !matches!(
                        order.payment_status,
                        PaymentStatus::Pending | PaymentStatus::Failed
                    )
                {
                    return Err(OrderError::NotAwaitingPayment {
                        order_id,
                        status: order.status,
                        payment_status: order.payment_status,
                    });
                }
                new_ref = true;
                Ok(Some(
                    OrderUpdate::from_record(order)
                        .payment_status(PaymentStatus::Pending)
                        .external_payment_ref(external_ref),
                ))
            })
            .await
            .map_err(|e| ref_in_use(e, external_ref))?;

        if written && !new_ref {
            tracing::info!(external_ref, "failed payment reset to pending");
        }
        if written && new_ref {
            self.record_payment_event(
                PaymentEventRecord::new(order_id, PaymentEventKind::IntentCreated)
                    .external_ref(external_ref)
                    .amount(order.total),
            )
            .await?;
        }
        Ok(order)
    }

    /// Records a successful capture: payment PAID, status PROCESSING.
    ///
    /// Gateways deliver at least once, so a second call with the same
    /// reference returns the order unchanged. The order's reservation is
    /// committed once the payment is recorded.
    #[tracing::instrument(skip(self))]
    pub async fn mark_paid(
        &self,
        order_id: OrderId,
        external_ref: &str,
        capture_id: Option<String>,
    ) -> Result<Order, OrderError> {
        let (order, written) = self
            .transition(order_id, |order| {
                if order.payment_status == PaymentStatus::Paid {
                    return match order.external_payment_ref.as_deref() {
                        Some(linked) if linked == external_ref => Ok(None),
                        linked => Err(OrderError::PaymentRefMismatch {
                            order_id,
                            expected: linked.unwrap_or_default().to_string(),
                            received: external_ref.to_string(),
                        }),
                    };
                }
                if order.status == OrderStatus::Cancelled {
                    return Err(OrderError::PaidAfterCancellation(order_id));
                }
                if let Some(linked) = order.external_payment_ref.as_deref()
                    && linked != external_ref
                {
                    return Err(OrderError::PaymentRefMismatch {
                        order_id,
                        expected: linked.to_string(),
                        received: external_ref.to_string(),
                    });
                }
                if !order.payment_status.can_transition_to(PaymentStatus::Paid) {
                    return Err(OrderError::InvalidPaymentTransition {
                        from: order.payment_status,
                        to: PaymentStatus::Paid,
                    });
                }
                if !order.status.can_transition_to(OrderStatus::Processing) {
                    return Err(OrderError::InvalidStatusTransition {
                        from: order.status,
                        to: OrderStatus::Processing,
                    });
                }
                Ok(Some(
                    OrderUpdate::from_record(order)
                        .status(OrderStatus::Processing)
                        .payment_status(PaymentStatus::Paid)
                        .external_payment_ref(external_ref)
                        .external_capture_id(capture_id.clone()),
                ))
            })
            .await
            .map_err(|e| ref_in_use(e, external_ref))?;

        if !written {
            tracing::debug!("payment already recorded");
            return Ok(order);
        }

        metrics::counter!("orders_marked_paid_total").increment(1);
        tracing::info!(external_ref, "order marked paid");

        let mut event = PaymentEventRecord::new(order_id, PaymentEventKind::CaptureSucceeded)
            .external_ref(external_ref)
            .amount(order.total);
        if let Some(capture_id) = &order.external_capture_id {
            event = event.detail(format!("capture {capture_id}"));
        }
        self.record_payment_event(event).await?;

        self.commit_reservation(&order).await;
        Ok(order)
    }

    /// Admin transition of the fulfillment status.
    ///
    /// Cancelling a PENDING order goes through [`cancel`](Self::cancel).
    /// Cancelling a PROCESSING order refunds its payment status; its stock was
    /// committed and stays sold.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order, OrderError> {
        if new_status == OrderStatus::Cancelled
            && self.get_order(order_id).await?.status == OrderStatus::Pending
        {
            return self.cancel(order_id).await;
        }

        let (order, written) = self
            .transition(order_id, |order| {
                if !order.status.can_transition_to(new_status) {
                    return Err(OrderError::InvalidStatusTransition {
                        from: order.status,
                        to: new_status,
                    });
                }
                let mut update = OrderUpdate::from_record(order).status(new_status);
                if new_status == OrderStatus::Cancelled {
                    update = update.payment_status(cancelled_payment_status(order.payment_status));
                }
                Ok(Some(update))
            })
            .await?;

        if written {
            tracing::info!(status = %order.status, "order status updated");
            if new_status == OrderStatus::Processing {
                self.commit_reservation(&order).await;
            }
        }
        Ok(order)
    }

    /// Admin transition of the payment status.
    #[tracing::instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        order_id: OrderId,
        new_status: PaymentStatus,
    ) -> Result<Order, OrderError> {
        let (order, written) = self
            .transition(order_id, |order| {
                let unlinked_paid =
                    new_status == PaymentStatus::Paid && order.external_payment_ref.is_none();
                if !order.payment_status.can_transition_to(new_status) || unlinked_paid {
                    return Err(OrderError::InvalidPaymentTransition {
                        from: order.payment_status,
                        to: new_status,
                    });
                }
                Ok(Some(
                    OrderUpdate::from_record(order).payment_status(new_status),
                ))
            })
            .await?;

        if written && new_status == PaymentStatus::Refunded {
            let mut event = PaymentEventRecord::new(order_id, PaymentEventKind::Refunded)
                .amount(order.total)
                .detail("payment status set by admin");
            if let Some(external_ref) = &order.external_payment_ref {
                event = event.external_ref(external_ref.clone());
            }
            self.record_payment_event(event).await?;
        }
        Ok(order)
    }

    /// Cancels a PENDING order and gives its reserved stock back.
    ///
    /// The payment status becomes REFUNDED if it was PAID, CANCELLED
    /// otherwise. A CANCELLED order whose reservation is still held only gets
    /// its stock released; any other repeat cancel is rejected, so stock is
    /// restored once.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let (order, written) = self
            .transition(order_id, |order| match order.status {
                OrderStatus::Pending => Ok(Some(
                    OrderUpdate::from_record(order)
                        .status(OrderStatus::Cancelled)
                        .payment_status(cancelled_payment_status(order.payment_status)),
                )),
                OrderStatus::Cancelled => Ok(None),
                from => Err(OrderError::InvalidStatusTransition {
                    from,
                    to: OrderStatus::Cancelled,
                }),
            })
            .await?;

        if !written {
            let held = self
                .store
                .get_reservation(order.reservation_id)
                .await?
                .is_some_and(|r| r.state == ReservationState::Reserved);
            if !held {
                return Err(OrderError::InvalidStatusTransition {
                    from: OrderStatus::Cancelled,
                    to: OrderStatus::Cancelled,
                });
            }
            tracing::warn!(
                reservation_id = %order.reservation_id,
                "cancelled order still holds stock, releasing"
            );
        }

        match self.inventory.release(order.reservation_id).await {
            Ok(released) => {
                tracing::info!(released, "order cancelled");
            }
            Err(InventoryError::AlreadyCommitted(reservation_id)) => {
                tracing::warn!(%reservation_id, "cancelled order had committed stock");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(order)
    }

    /// Appends to the payment log. Returns false for a replayed external event.
    pub async fn record_payment_event(&self, event: PaymentEventRecord) -> Result<bool, OrderError> {
        Ok(self.store.append_payment_event(event).await?)
    }

    pub async fn payment_events(
        &self,
        order_id: OrderId,
    ) -> Result<Vec<PaymentEventRecord>, OrderError> {
        Ok(self.store.payment_events(order_id).await?)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, OrderError> {
        Ok(self.store.find_order_by_idempotency_key(key).await?)
    }

    pub async fn find_by_payment_ref(&self, external_ref: &str) -> Result<Option<Order>, OrderError> {
        Ok(self.store.find_order_by_payment_ref(external_ref).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderQuery) -> Result<OrderPage, OrderError> {
        Ok(self.store.list_orders(query).await?)
    }

    /// Loads the order, lets `decide` pick the write, and applies it with a
    /// version check. Returns the resulting order and whether it was written.
    ///
    /// `decide` returning `None` means the order is already where the caller
    /// wants it.
    async fn transition<F>(&self, order_id: OrderId, mut decide: F) -> Result<(Order, bool), OrderError>
    where
        F: FnMut(&Order) -> Result<Option<OrderUpdate>, OrderError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let order = self.get_order(order_id).await?;
            let Some(update) = decide(&order)? else {
                return Ok((order, false));
            };

            match self.store.update_order(order_id, update).await {
                Ok(updated) => return Ok((updated, true)),
                Err(StoreError::ConcurrencyConflict { actual, .. }) => {
                    tracing::debug!(attempt, actual, "order version moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(OrderError::ConcurrentModification(order_id))
    }

    async fn commit_reservation(&self, order: &Order) {
        if let Err(e) = self.inventory.commit(order.reservation_id).await {
            tracing::error!(
                order_id = %order.id,
                reservation_id = %order.reservation_id,
                error = %e,
                "failed to commit reservation of paid order"
            );
        }
    }
}

fn cancelled_payment_status(current: PaymentStatus) -> PaymentStatus {
    match current {
        PaymentStatus::Paid | PaymentStatus::Refunded => PaymentStatus::Refunded,
        _ => PaymentStatus::Cancelled,
    }
}

fn ref_in_use(e: OrderError, external_ref: &str) -> OrderError {
    match e {
        OrderError::Store(StoreError::Duplicate { .. }) => {
            OrderError::PaymentRefInUse(external_ref.to_string())
        }
        other => other,
    }
}
