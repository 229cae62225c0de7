//! Checkout orchestrator: turns a session cart into a paid order.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use common::{
    IdempotencyKey, Money, OrderId, OrderStatus, PaymentMethod, PaymentStatus, ReservationId,
    SessionId, UserId,
};
use domain::{
    Cart, CartStore, InventoryGuard, NewPendingOrder, Order, OrderError, OrderLedger, OrderLine,
    ReservationToken,
};
use serde::Serialize;
use storage::{
    CatalogStore, PaymentEventKind, PaymentEventRecord, ShippingAddress, StockLine, Storage,
};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::gateway::{GatewayError, GatewayLineItem, IntentRef, IntentRequest, PaymentGateway};
use crate::steps;
use crate::webhook::{WebhookError, WebhookEvent, WebhookEventType, WebhookVerifier};

/// Input of a checkout. Carries no prices; those are read from the catalog.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub session_id: SessionId,
    /// Chosen by the client; the same key always means the same purchase.
    pub idempotency_key: IdempotencyKey,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
}

/// Where the payment of a successful checkout stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Funds captured; the order is PROCESSING.
    Captured { capture_id: Option<String> },

    /// Wallet payment opened; the buyer must approve it before capture.
    AwaitingApproval { approval_url: Option<String> },
}

/// Result of a successful checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub payment: PaymentOutcome,
    /// True if an earlier attempt with the same idempotency key created the
    /// order.
    pub resumed: bool,
}

/// What a webhook delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    /// The event was already handled.
    Duplicate,
    /// Unknown payment or uninteresting event type.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Coordinates the cart, the inventory guard, the payment gateway and the
/// order ledger into one checkout.
///
/// Steps run strictly in order: read cart, price items, reserve stock, write
/// the PENDING order, open the payment, capture, clear the cart. A failed
/// order write releases the reservation. A failed or slow gateway leaves the
/// order PENDING with its stock held, since the charge may still land.
pub struct CheckoutOrchestrator<S, G> {
    store: S,
    carts: CartStore<S>,
    inventory: InventoryGuard<S>,
    ledger: OrderLedger<S>,
    gateway: G,
    verifier: WebhookVerifier,
    config: CheckoutConfig,
}

impl<S, G> CheckoutOrchestrator<S, G>
where
    S: Storage,
    G: PaymentGateway,
{
    /// Creates a new orchestrator.
    pub fn new(store: S, gateway: G, config: CheckoutConfig) -> Self {
        Self {
            carts: CartStore::new(store.clone(), config.cart_ttl),
            inventory: InventoryGuard::new(store.clone()),
            ledger: OrderLedger::new(store.clone()),
            verifier: WebhookVerifier::new(
                config.webhook_secret.clone().into_bytes(),
                config.webhook_tolerance,
            ),
            store,
            gateway,
            config,
        }
    }

    pub fn carts(&self) -> &CartStore<S> {
        &self.carts
    }

    pub fn inventory(&self) -> &InventoryGuard<S> {
        &self.inventory
    }

    pub fn ledger(&self) -> &OrderLedger<S> {
        &self.ledger
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Runs the checkout saga for the session's cart.
    ///
    /// Safe to retry with the same idempotency key: an order already written
    /// for the key is resumed from where it stopped, never duplicated.
    #[tracing::instrument(
        skip(self, request),
        fields(saga_type = steps::SAGA_TYPE, idempotency_key = %request.idempotency_key)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = Instant::now();

        let result = self.run_checkout(&request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(receipt) => {
                metrics::counter!("checkout_completed").increment(1);
                tracing::info!(
                    order_id = %receipt.order.id,
                    resumed = receipt.resumed,
                    "checkout completed"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failed", "reason" => e.reason()).increment(1);
                tracing::warn!(error = %e, "checkout failed");
            }
        }
        result
    }

    async fn run_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutReceipt> {
        if request.idempotency_key.is_blank() {
            return Err(CheckoutError::MissingIdempotencyKey);
        }

        if let Some(order) = self
            .ledger
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            return self.resume(order, request).await;
        }

        // 1. Read the cart
        tracing::info!(step = steps::STEP_READ_CART, "checkout step started");
        let cart = self.carts.get(&request.session_id).await?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        // 2. Re-read authoritative prices
        tracing::info!(step = steps::STEP_PRICE_ITEMS, "checkout step started");
        let lines = self.price_lines(&cart).await?;

        // 3. Reserve stock, all or nothing
        tracing::info!(step = steps::STEP_RESERVE_INVENTORY, "checkout step started");
        let token = self
            .reserve(&request.idempotency_key, cart.stock_lines())
            .await?;

        // 4. Write the PENDING order
        tracing::info!(step = steps::STEP_CREATE_ORDER, "checkout step started");
        let new_order = NewPendingOrder {
            user_id: request.user_id,
            session_id: request.session_id.clone(),
            email: request.email.clone(),
            idempotency_key: request.idempotency_key.clone(),
            reservation_id: token.id,
            payment_method: request.payment_method,
            shipping_address: request.shipping_address.clone(),
            currency: self.config.currency.clone(),
            lines,
        };

        let order = match self.ledger.create_pending_order(new_order).await {
            Ok(order) => order,
            Err(OrderError::DuplicateIdempotencyKey(key)) => {
                // Another attempt with the same key wrote its order first.
                if !token.resumed {
                    self.release_reservation(token.id).await;
                }
                let existing = self
                    .ledger
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?
                    .ok_or(CheckoutError::IdempotencyConflict(key))?;
                return self.resume(existing, request).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "order creation failed, compensating");
                // A resumed reservation may belong to a concurrent attempt.
                if !token.resumed {
                    self.release_reservation(token.id).await;
                }
                return Err(CheckoutError::OrderCreationFailed {
                    reason: e.to_string(),
                });
            }
        };

        // 5-7. Pay and clear the cart
        self.pay(order, &request.session_id, false).await
    }

    /// Picks up an order an earlier attempt with the same key wrote.
    async fn resume(&self, order: Order, request: &CheckoutRequest) -> Result<CheckoutReceipt> {
        tracing::info!(
            order_id = %order.id,
            status = %order.status,
            payment_status = %order.payment_status,
            "resuming checkout"
        );

        match (order.status, order.payment_status) {
            (OrderStatus::Cancelled, _) => Err(CheckoutError::IdempotencyConflict(
                request.idempotency_key.to_string(),
            )),
            (_, PaymentStatus::Paid) => {
                self.clear_cart(&request.session_id).await;
                Ok(CheckoutReceipt {
                    payment: PaymentOutcome::Captured {
                        capture_id: order.external_capture_id.clone(),
                    },
                    order,
                    resumed: true,
                })
            }
            (OrderStatus::Pending, PaymentStatus::Pending | PaymentStatus::Failed) => {
                self.pay(order, &request.session_id, true).await
            }
            _ => Err(CheckoutError::IdempotencyConflict(
                request.idempotency_key.to_string(),
            )),
        }
    }

    async fn price_lines(&self, cart: &Cart) -> Result<Vec<OrderLine>> {
        let mut lines = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let product = self
                .store
                .get_product(&item.product_id)
                .await?
                .ok_or_else(|| CheckoutError::ProductNotFound {
                    product_id: item.product_id.clone(),
                })?;

            if product.price != item.unit_price_snapshot {
                tracing::info!(
                    product_id = %item.product_id,
                    snapshot = %item.unit_price_snapshot,
                    price = %product.price,
                    "price changed since the item was added"
                );
            }
            lines.push(OrderLine::new(
                item.product_id.clone(),
                item.quantity,
                product.price,
            ));
        }
        Ok(lines)
    }

    async fn reserve(
        &self,
        key: &IdempotencyKey,
        wanted: Vec<StockLine>,
    ) -> Result<ReservationToken> {
        let token = self.inventory.reserve(key, wanted.clone()).await?;
        // A live token for the key may belong to an attempt that is still
        // running, so it is never released from here.
        if token.resumed && token.lines != StockLine::merge(wanted) {
            tracing::warn!(
                reservation_id = %token.id,
                "key already holds a reservation for a different cart"
            );
            return Err(CheckoutError::IdempotencyConflict(key.to_string()));
        }
        Ok(token)
    }

    async fn pay(
        &self,
        order: Order,
        session_id: &SessionId,
        resumed: bool,
    ) -> Result<CheckoutReceipt> {
        tracing::info!(
            step = steps::STEP_INITIATE_PAYMENT,
            order_id = %order.id,
            "checkout step started"
        );
        let (order, intent) = self.initiate_payment(order).await?;

        if order.payment_method.requires_approval() {
            tracing::info!(intent_id = %intent.id, "awaiting buyer approval");
            return Ok(CheckoutReceipt {
                order,
                payment: PaymentOutcome::AwaitingApproval {
                    approval_url: intent.approval_url,
                },
                resumed,
            });
        }

        let order = self.capture(order, &intent.id).await?;
        self.clear_cart(session_id).await;

        Ok(CheckoutReceipt {
            payment: PaymentOutcome::Captured {
                capture_id: order.external_capture_id.clone(),
            },
            order,
            resumed,
        })
    }

    /// Opens the payment and links it to the order before any capture.
    async fn initiate_payment(&self, order: Order) -> Result<(Order, IntentRef)> {
        if let (Some(existing), PaymentMethod::Card) =
            (&order.external_payment_ref, order.payment_method)
        {
            let intent = IntentRef {
                id: existing.clone(),
                approval_url: None,
            };
            return Ok((order, intent));
        }

        let request = IntentRequest {
            order_id: order.id,
            idempotency_key: order.idempotency_key.clone(),
            amount: order.total,
            currency: order.currency.clone(),
            method: order.payment_method,
            line_items: order
                .items
                .iter()
                .map(|item| GatewayLineItem {
                    product_id: item.product_id.clone(),
                    quantity: item.quantity,
                    unit_price: item.price_at_purchase,
                })
                .collect(),
        };

        let intent = match self
            .call_gateway(self.gateway.create_intent(&request))
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                self.log_payment_event(
                    PaymentEventRecord::new(order.id, PaymentEventKind::IntentFailed)
                        .amount(order.total)
                        .detail(e.to_string()),
                )
                .await;
                return Err(gateway_failure(order.id, e));
            }
        };

        let order = self.ledger.attach_payment_ref(order.id, &intent.id).await?;
        Ok((order, intent))
    }

    /// Captures the order's payment and marks it paid.
    async fn capture(&self, order: Order, external_ref: &str) -> Result<Order> {
        tracing::info!(
            step = steps::STEP_CAPTURE_PAYMENT,
            order_id = %order.id,
            "checkout step started"
        );

        match self
            .call_gateway(self.gateway.capture(external_ref, &order.idempotency_key))
            .await
        {
            Ok(capture) if capture.success => {
                self.record_capture(&order, external_ref, capture.external_capture_id)
                    .await
            }
            Ok(capture) => {
                let reason = capture
                    .failure_reason
                    .unwrap_or_else(|| "declined".to_string());
                self.log_payment_event(
                    PaymentEventRecord::new(order.id, PaymentEventKind::CaptureDeclined)
                        .external_ref(external_ref)
                        .detail(reason.clone()),
                )
                .await;
                Err(CheckoutError::PaymentGateway {
                    order_id: order.id,
                    reason,
                })
            }
            Err(e) => {
                let kind = match e {
                    GatewayError::Timeout(_) => PaymentEventKind::CaptureTimedOut,
                    _ => PaymentEventKind::CaptureFailed,
                };
                self.log_payment_event(
                    PaymentEventRecord::new(order.id, kind)
                        .external_ref(external_ref)
                        .detail(e.to_string()),
                )
                .await;
                Err(gateway_failure(order.id, e))
            }
        }
    }

    /// Marks the order paid. A capture for a cancelled order is refunded.
    async fn record_capture(
        &self,
        order: &Order,
        external_ref: &str,
        capture_id: Option<String>,
    ) -> Result<Order> {
        match self.ledger.mark_paid(order.id, external_ref, capture_id).await {
            Ok(order) => Ok(order),
            Err(OrderError::PaidAfterCancellation(order_id)) => {
                tracing::warn!(%order_id, external_ref, "payment captured for cancelled order, refunding");
                self.log_payment_event(
                    PaymentEventRecord::new(order_id, PaymentEventKind::LatePaymentOnCancelledOrder)
                        .external_ref(external_ref)
                        .amount(order.total),
                )
                .await;
                self.refund(order, external_ref).await?;
                Err(CheckoutError::OrderCancelled(order_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Captures a wallet payment after the buyer approved it.
    ///
    /// Clears the session cart once the order is paid. Confirming an order
    /// that is already paid only clears the cart.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        session_id: &SessionId,
        order_id: OrderId,
    ) -> Result<CheckoutReceipt> {
        let order = self.ledger.get_order(order_id).await?;

        if order.payment_status == PaymentStatus::Paid {
            self.clear_cart(session_id).await;
            return Ok(CheckoutReceipt {
                payment: PaymentOutcome::Captured {
                    capture_id: order.external_capture_id.clone(),
                },
                order,
                resumed: true,
            });
        }
        if order.status == OrderStatus::Cancelled {
            return Err(CheckoutError::OrderCancelled(order_id));
        }
        let Some(external_ref) = order.external_payment_ref.clone() else {
            return Err(CheckoutError::NotAwaitingPayment {
                order_id,
                status: order.status,
                payment_status: order.payment_status,
            });
        };

        let order = self.capture(order, &external_ref).await?;
        self.clear_cart(session_id).await;

        Ok(CheckoutReceipt {
            payment: PaymentOutcome::Captured {
                capture_id: order.external_capture_id.clone(),
            },
            order,
            resumed: false,
        })
    }

    /// Authenticates and applies a payment webhook.
    ///
    /// Deliveries are at least once; an event ID already in the payment log
    /// is acknowledged without effect.
    #[tracing::instrument(skip(self, signature, payload), fields(bytes = payload.len()))]
    pub async fn handle_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome> {
        let result = self.process_webhook(signature, payload).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(CheckoutError::Webhook(_)) => "rejected",
            Err(_) => "error",
        };
        metrics::counter!("payment_webhooks_total", "outcome" => outcome).increment(1);
        result
    }

    async fn process_webhook(
        &self,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome> {
        let signature = signature.ok_or(WebhookError::MissingSignature)?;
        self.verifier
            .verify(signature, payload, Utc::now().timestamp())?;
        let event = WebhookEvent::parse(payload)?;
        let intent_id = event.data.intent_id.as_str();

        let Some(order) = self.ledger.find_by_payment_ref(intent_id).await? else {
            tracing::warn!(event_id = %event.id, intent_id, "webhook for unknown payment");
            return Ok(WebhookOutcome::Ignored);
        };

        let seen = self
            .ledger
            .payment_events(order.id)
            .await?
            .iter()
            .any(|e| e.external_event_id.as_deref() == Some(event.id.as_str()));
        if seen {
            tracing::debug!(event_id = %event.id, "webhook replay");
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = match event.event_type {
            WebhookEventType::PaymentCaptured => {
                match self
                    .record_capture(&order, intent_id, event.data.capture_id.clone())
                    .await
                {
                    Ok(_) | Err(CheckoutError::OrderCancelled(_)) => WebhookOutcome::Processed,
                    Err(e) => return Err(e),
                }
            }
            WebhookEventType::PaymentFailed => {
                if order.status == OrderStatus::Pending
                    && order.payment_status == PaymentStatus::Pending
                {
                    self.ledger
                        .update_payment_status(order.id, PaymentStatus::Failed)
                        .await?;
                }
                self.log_payment_event(
                    PaymentEventRecord::new(order.id, PaymentEventKind::CaptureDeclined)
                        .external_ref(intent_id)
                        .detail(
                            event
                                .data
                                .failure_reason
                                .clone()
                                .unwrap_or_else(|| "payment failed".to_string()),
                        ),
                )
                .await;
                WebhookOutcome::Processed
            }
            WebhookEventType::Other => WebhookOutcome::Ignored,
        };

        let mut received = PaymentEventRecord::new(order.id, PaymentEventKind::WebhookReceived)
            .external_ref(intent_id)
            .external_event_id(event.id.clone())
            .detail(event.event_type.as_str());
        if let Some(cents) = event.data.amount {
            received = received.amount(Money::from_cents(cents));
        }
        if !self.ledger.record_payment_event(received).await? {
            return Ok(WebhookOutcome::Duplicate);
        }

        tracing::info!(event_id = %event.id, outcome = outcome.as_str(), "webhook handled");
        Ok(outcome)
    }

    /// Cancels a PENDING order, refunding it first if it was paid.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let order = self.ledger.get_order(order_id).await?;
        match order.status {
            OrderStatus::Pending => self.refund_if_paid(&order).await?,
            // The ledger finishes a cancel whose stock release failed.
            OrderStatus::Cancelled => {}
            from => {
                return Err(CheckoutError::InvalidStatusTransition {
                    from,
                    to: OrderStatus::Cancelled,
                });
            }
        }
        Ok(self.ledger.cancel(order_id).await?)
    }

    /// Admin move of the fulfillment status.
    ///
    /// Cancelling a paid order refunds it through the gateway before the
    /// ledger records the cancellation.
    #[tracing::instrument(skip(self))]
    pub async fn admin_update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<Order> {
        let order = self.ledger.get_order(order_id).await?;
        if !order.status.can_transition_to(new_status) {
            return Err(CheckoutError::InvalidStatusTransition {
                from: order.status,
                to: new_status,
            });
        }

        if new_status == OrderStatus::Cancelled {
            if order.status == OrderStatus::Pending {
                return self.cancel_order(order_id).await;
            }
            self.refund_if_paid(&order).await?;
        }
        Ok(self.ledger.update_status(order_id, new_status).await?)
    }

    /// Admin move of the payment status. Records only; no money moves.
    #[tracing::instrument(skip(self))]
    pub async fn admin_update_payment_status(
        &self,
        order_id: OrderId,
        new_status: PaymentStatus,
    ) -> Result<Order> {
        Ok(self
            .ledger
            .update_payment_status(order_id, new_status)
            .await?)
    }

    async fn refund_if_paid(&self, order: &Order) -> Result<()> {
        if order.payment_status != PaymentStatus::Paid {
            return Ok(());
        }
        match order.external_payment_ref.as_deref() {
            Some(external_ref) => {
                self.refund(order, external_ref).await?;
            }
            None => {
                tracing::warn!(order_id = %order.id, "paid order has no payment reference to refund");
            }
        }
        Ok(())
    }

    async fn refund(&self, order: &Order, external_ref: &str) -> Result<String> {
        match self
            .call_gateway(self.gateway.refund(external_ref, order.total))
            .await
        {
            Ok(refund_id) => {
                self.ledger
                    .record_payment_event(
                        PaymentEventRecord::new(order.id, PaymentEventKind::Refunded)
                            .external_ref(external_ref)
                            .amount(order.total)
                            .detail(format!("refund {refund_id}")),
                    )
                    .await?;
                tracing::info!(order_id = %order.id, %refund_id, "payment refunded");
                Ok(refund_id)
            }
            Err(e) => {
                self.log_payment_event(
                    PaymentEventRecord::new(order.id, PaymentEventKind::RefundFailed)
                        .external_ref(external_ref)
                        .amount(order.total)
                        .detail(e.to_string()),
                )
                .await;
                Err(CheckoutError::RefundFailed {
                    order_id: order.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn call_gateway<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, GatewayError>>,
    ) -> std::result::Result<T, GatewayError> {
        let limit = self.config.payment_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(GatewayError::Timeout(limit)))
    }

    async fn release_reservation(&self, id: ReservationId) {
        if let Err(e) = self.inventory.release(id).await {
            tracing::error!(reservation_id = %id, error = %e, "failed to release reservation");
        }
    }

    async fn clear_cart(&self, session_id: &SessionId) {
        tracing::info!(step = steps::STEP_CLEAR_CART, "checkout step started");
        if let Err(e) = self.carts.clear(session_id).await {
            tracing::warn!(error = %e, "failed to clear cart");
        }
    }

    /// Appends to the payment log without letting a log failure mask the
    /// error being reported.
    async fn log_payment_event(&self, event: PaymentEventRecord) {
        let kind = event.kind;
        if let Err(e) = self.ledger.record_payment_event(event).await {
            tracing::error!(%kind, error = %e, "failed to record payment event");
        }
    }
}

fn gateway_failure(order_id: OrderId, e: GatewayError) -> CheckoutError {
    match e {
        GatewayError::Timeout(_) => CheckoutError::PaymentTimeout { order_id },
        other => CheckoutError::PaymentGateway {
            order_id,
            reason: other.to_string(),
        },
    }
}
