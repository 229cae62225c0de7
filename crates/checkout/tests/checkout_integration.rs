//! Integration tests for the checkout saga.

use std::sync::Arc;
use std::time::Duration;

use checkout::{
    CheckoutConfig, CheckoutError, CheckoutOrchestrator, CheckoutRequest, InMemoryPaymentGateway,
    PaymentOutcome, WebhookError, WebhookOutcome, WebhookVerifier,
};
use chrono::Utc;
use common::{
    IdempotencyKey, Money, OrderStatus, PaymentMethod, PaymentStatus, ProductId, ReservationState,
    SessionId,
};
use storage::{
    CatalogStore, InMemoryStore, PaymentEventKind, Product, ReservationStore, ShippingAddress,
    StockLine,
};

type TestOrchestrator = CheckoutOrchestrator<InMemoryStore, InMemoryPaymentGateway>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    store: InMemoryStore,
    gateway: InMemoryPaymentGateway,
    config: CheckoutConfig,
}

impl TestHarness {
    async fn new() -> Self {
        let store = InMemoryStore::with_products([
            Product::new("P1", "Widget", Money::from_cents(1000), 5),
            Product::new("P2", "Gadget", Money::from_cents(2500), 1),
        ])
        .await;
        let gateway = InMemoryPaymentGateway::new();
        let config = CheckoutConfig {
            payment_timeout: Duration::from_millis(200),
            ..CheckoutConfig::default()
        };
        let orchestrator = Arc::new(CheckoutOrchestrator::new(
            store.clone(),
            gateway.clone(),
            config.clone(),
        ));

        Self {
            orchestrator,
            store,
            gateway,
            config,
        }
    }

    async fn add_to_cart(&self, session: &str, product: &str, quantity: i64) {
        self.orchestrator
            .carts()
            .add(&SessionId::new(session), ProductId::new(product), quantity)
            .await
            .unwrap();
    }

    async fn stock(&self, product: &str) -> u32 {
        self.store.stock_of(&ProductId::new(product)).await.unwrap()
    }

    async fn cart_len(&self, session: &str) -> usize {
        self.orchestrator
            .carts()
            .get(&SessionId::new(session))
            .await
            .unwrap()
            .items()
            .len()
    }

    fn signed(&self, payload: &str) -> String {
        WebhookVerifier::new(self.config.webhook_secret.clone(), self.config.webhook_tolerance)
            .sign(payload.as_bytes(), Utc::now().timestamp())
            .unwrap()
    }
}

fn request(session: &str, key: &str, method: PaymentMethod) -> CheckoutRequest {
    CheckoutRequest {
        session_id: SessionId::new(session),
        idempotency_key: IdempotencyKey::new(key),
        user_id: None,
        email: Some("buyer@example.com".to_string()),
        shipping_address: ShippingAddress {
            recipient: "Ada Lovelace".to_string(),
            line1: "12 St James's Square".to_string(),
            line2: None,
            city: "London".to_string(),
            region: None,
            postal_code: "SW1Y 4JH".to_string(),
            country: "GB".to_string(),
        },
        payment_method: method,
    }
}

fn captured_payload(event_id: &str, intent_id: &str) -> String {
    format!(
        r#"{{"id":"{event_id}","type":"payment.captured","data":{{"intent_id":"{intent_id}","capture_id":"cap_x"}}}}"#
    )
}

#[tokio::test]
async fn card_checkout_reserves_stock_and_captures() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;

    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    assert_eq!(receipt.order.total, Money::from_cents(3 * 1000));
    assert_eq!(receipt.order.status, OrderStatus::Processing);
    assert_eq!(receipt.order.payment_status, PaymentStatus::Paid);
    assert!(matches!(receipt.payment, PaymentOutcome::Captured { .. }));
    assert!(!receipt.resumed);
    assert_eq!(h.stock("P1").await, 2);
    assert_eq!(h.cart_len("s1").await, 0);
    assert_eq!(h.store.reservation_count(ReservationState::Committed).await, 1);
}

#[tokio::test]
async fn wallet_checkout_leaves_pending_order_awaiting_approval() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;

    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Wallet))
        .await
        .unwrap();

    assert_eq!(receipt.order.status, OrderStatus::Pending);
    assert_eq!(receipt.order.payment_status, PaymentStatus::Pending);
    assert_eq!(receipt.order.total, Money::from_cents(3000));
    assert!(receipt.order.external_payment_ref.is_some());
    match receipt.payment {
        PaymentOutcome::AwaitingApproval { approval_url } => assert!(approval_url.is_some()),
        other => panic!("expected approval, got {other:?}"),
    }
    assert_eq!(h.stock("P1").await, 2);
    assert_eq!(h.cart_len("s1").await, 1);

    let confirmed = h
        .orchestrator
        .confirm_payment(&SessionId::new("s1"), receipt.order.id)
        .await
        .unwrap();

    assert_eq!(confirmed.order.status, OrderStatus::Processing);
    assert_eq!(confirmed.order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.cart_len("s1").await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_never_oversell() {
    let h = TestHarness::new().await;
    h.add_to_cart("a", "P1", 3).await;
    h.add_to_cart("b", "P1", 3).await;

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .checkout(request("a", "key-a", PaymentMethod::Card))
                .await
        })
    };
    let second = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .checkout(request("b", "key-b", PaymentMethod::Card))
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let short = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(CheckoutError::InsufficientStock {
                    requested: 3,
                    available: 2,
                    ..
                })
            )
        })
        .count();

    assert_eq!(succeeded, 1);
    assert_eq!(short, 1);
    assert_eq!(h.stock("P1").await, 2);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn shortage_in_one_line_reserves_nothing() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.add_to_cart("s1", "P2", 2).await;

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    match err {
        CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, ProductId::new("P2"));
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
    assert_eq!(h.stock("P1").await, 5);
    assert_eq!(h.stock("P2").await, 1);
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.cart_len("s1").await, 2);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let h = TestHarness::new().await;

    let err = h
        .orchestrator
        .checkout(request("nobody", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::EmptyCart));
    assert_eq!(h.gateway.intent_count().await, 0);
}

#[tokio::test]
async fn blank_idempotency_key_is_rejected() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;

    let err = h
        .orchestrator
        .checkout(request("s1", "  ", PaymentMethod::Card))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::MissingIdempotencyKey));
    assert_eq!(h.stock("P1").await, 5);
}

#[tokio::test]
async fn charge_uses_catalog_price_not_cart_snapshot() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.store
        .upsert_product(Product::new("P1", "Widget", Money::from_cents(1200), 5))
        .await
        .unwrap();

    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    assert_eq!(receipt.order.total, Money::from_cents(3600));
    assert_eq!(receipt.order.items[0].price_at_purchase, Money::from_cents(1200));
}

#[tokio::test]
async fn capture_timeout_leaves_order_pending_and_cart_intact() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.gateway.set_capture_delay(Duration::from_secs(2));

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    let order_id = match err {
        CheckoutError::PaymentTimeout { order_id } => order_id,
        other => panic!("expected PaymentTimeout, got {other:?}"),
    };
    let order = h.orchestrator.ledger().get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.external_payment_ref.is_some());
    assert_eq!(h.stock("P1").await, 2);
    assert_eq!(h.store.reservation_count(ReservationState::Reserved).await, 1);
    assert_eq!(h.cart_len("s1").await, 1);

    let events = h.orchestrator.ledger().payment_events(order_id).await.unwrap();
    assert!(events.iter().any(|e| e.kind == PaymentEventKind::CaptureTimedOut));
}

#[tokio::test]
async fn retry_after_timeout_resumes_the_same_order() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.gateway.set_capture_delay(Duration::from_secs(2));
    let first = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();
    h.gateway.set_capture_delay(Duration::ZERO);

    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    assert_eq!(first.pending_order(), Some(receipt.order.id));
    assert!(receipt.resumed);
    assert_eq!(receipt.order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.gateway.intent_count().await, 1);
    assert_eq!(h.stock("P1").await, 2);
    assert_eq!(h.cart_len("s1").await, 0);
}

#[tokio::test]
async fn retry_after_success_returns_the_same_order() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 2).await;

    let first = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    assert_eq!(first.order.id, second.order.id);
    assert!(second.resumed);
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.gateway.capture_calls().await, 1);
    assert_eq!(h.stock("P1").await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_with_one_key_create_one_order() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 2).await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .checkout(request("s1", "key-1", PaymentMethod::Card))
                    .await
            })
        })
        .collect();

    let mut order_ids = Vec::new();
    for handle in handles {
        if let Ok(receipt) = handle.await.unwrap() {
            order_ids.push(receipt.order.id);
        }
    }

    assert!(!order_ids.is_empty());
    assert!(order_ids.iter().all(|id| *id == order_ids[0]));
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(h.stock("P1").await, 3);
}

#[tokio::test]
async fn live_reservation_for_another_cart_is_left_alone() {
    let h = TestHarness::new().await;
    // An in-flight attempt with the same key holds one unit.
    let in_flight = h
        .orchestrator
        .inventory()
        .reserve(
            &IdempotencyKey::new("key-1"),
            vec![StockLine::new("P1", 1)],
        )
        .await
        .unwrap();
    h.add_to_cart("s1", "P1", 2).await;

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::IdempotencyConflict(_)));
    let reservation = h
        .store
        .get_reservation(in_flight.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.state, ReservationState::Reserved);
    assert_eq!(h.stock("P1").await, 4);
    assert_eq!(h.store.order_count().await, 0);
    assert_eq!(h.gateway.intent_count().await, 0);
    assert_eq!(h.cart_len("s1").await, 1);
}

#[tokio::test]
async fn failed_order_write_releases_the_reservation() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.store.set_fail_on_order_insert(true);

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::OrderCreationFailed { .. }));
    assert_eq!(h.stock("P1").await, 5);
    assert_eq!(h.store.reservation_count(ReservationState::Released).await, 1);
    assert_eq!(h.gateway.intent_count().await, 0);
    assert_eq!(h.cart_len("s1").await, 1);

    // The key stays usable once storage recovers.
    h.store.set_fail_on_order_insert(false);
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();
    assert_eq!(receipt.order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.stock("P1").await, 2);
}

#[tokio::test]
async fn gateway_outage_keeps_order_pending_and_cart() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;
    h.gateway.set_fail_on_create_intent(true);

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    let order_id = err.pending_order().unwrap();
    assert!(matches!(err, CheckoutError::PaymentGateway { .. }));
    let order = h.orchestrator.ledger().get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.external_payment_ref.is_none());
    assert_eq!(h.stock("P1").await, 4);
    assert_eq!(h.cart_len("s1").await, 1);
}

#[tokio::test]
async fn declined_capture_is_logged_and_not_marked_paid() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;
    h.gateway.set_decline_captures(true);

    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();

    let CheckoutError::PaymentGateway { order_id, reason } = err else {
        panic!("expected PaymentGateway, got {err:?}");
    };
    assert_eq!(reason, "card_declined");
    let order = h.orchestrator.ledger().get_order(order_id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    let events = h.orchestrator.ledger().payment_events(order_id).await.unwrap();
    assert!(events.iter().any(|e| e.kind == PaymentEventKind::CaptureDeclined));
}

#[tokio::test]
async fn webhook_capture_marks_paid_and_replays_are_noops() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 2).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Wallet))
        .await
        .unwrap();
    let intent_id = receipt.order.external_payment_ref.clone().unwrap();
    h.gateway.capture_out_of_band(&intent_id).await.unwrap();

    let payload = captured_payload("evt_1", &intent_id);
    let signature = h.signed(&payload);

    let first = h
        .orchestrator
        .handle_webhook(Some(&signature), payload.as_bytes())
        .await
        .unwrap();
    let replay = h
        .orchestrator
        .handle_webhook(Some(&signature), payload.as_bytes())
        .await
        .unwrap();

    assert_eq!(first, WebhookOutcome::Processed);
    assert_eq!(replay, WebhookOutcome::Duplicate);

    let order = h
        .orchestrator
        .ledger()
        .get_order(receipt.order.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let events = h.orchestrator.ledger().payment_events(order.id).await.unwrap();
    let captures = events
        .iter()
        .filter(|e| e.kind == PaymentEventKind::CaptureSucceeded)
        .count();
    assert_eq!(captures, 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let h = TestHarness::new().await;
    let payload = captured_payload("evt_1", "pi_000001");
    let signature = WebhookVerifier::new("not-the-secret", Duration::from_secs(300))
        .sign(payload.as_bytes(), Utc::now().timestamp())
        .unwrap();

    let err = h
        .orchestrator
        .handle_webhook(Some(&signature), payload.as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Webhook(WebhookError::SignatureMismatch)
    ));

    let err = h
        .orchestrator
        .handle_webhook(None, payload.as_bytes())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Webhook(WebhookError::MissingSignature)
    ));
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_ignored() {
    let h = TestHarness::new().await;
    let payload = captured_payload("evt_1", "pi_unknown");

    let outcome = h
        .orchestrator
        .handle_webhook(Some(&h.signed(&payload)), payload.as_bytes())
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn webhook_failure_marks_payment_failed_and_retry_recovers() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;
    h.gateway.set_decline_captures(true);
    let err = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();
    let order_id = err.pending_order().unwrap();
    let intent_id = h
        .orchestrator
        .ledger()
        .get_order(order_id)
        .await
        .unwrap()
        .external_payment_ref
        .unwrap();

    let payload = format!(
        r#"{{"id":"evt_f","type":"payment.failed","data":{{"intent_id":"{intent_id}","failure_reason":"insufficient_funds"}}}}"#
    );
    h.orchestrator
        .handle_webhook(Some(&h.signed(&payload)), payload.as_bytes())
        .await
        .unwrap();
    let order = h.orchestrator.ledger().get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Failed);

    h.gateway.set_decline_captures(false);
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();
    assert_eq!(receipt.order.id, order_id);
    assert_eq!(receipt.order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn late_capture_on_cancelled_order_is_refunded() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Wallet))
        .await
        .unwrap();
    let order_id = receipt.order.id;
    let intent_id = receipt.order.external_payment_ref.clone().unwrap();

    let cancelled = h.orchestrator.cancel_order(order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);
    assert_eq!(h.stock("P1").await, 5);

    h.gateway.capture_out_of_band(&intent_id).await.unwrap();
    let payload = captured_payload("evt_late", &intent_id);
    let outcome = h
        .orchestrator
        .handle_webhook(Some(&h.signed(&payload)), payload.as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome, WebhookOutcome::Processed);
    assert_eq!(h.gateway.refund_count().await, 1);
    let order = h.orchestrator.ledger().get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(h.stock("P1").await, 5);

    let kinds: Vec<_> = h
        .orchestrator
        .ledger()
        .payment_events(order_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&PaymentEventKind::LatePaymentOnCancelledOrder));
    assert!(kinds.contains(&PaymentEventKind::Refunded));
}

#[tokio::test]
async fn cancelling_pending_order_releases_exactly_its_stock_once() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 3).await;
    h.gateway.set_capture_delay(Duration::from_secs(2));
    let order_id = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err()
        .pending_order()
        .unwrap();
    assert_eq!(h.stock("P1").await, 2);

    let cancelled = h.orchestrator.cancel_order(order_id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(h.stock("P1").await, 5);

    let again = h.orchestrator.cancel_order(order_id).await.unwrap_err();
    assert!(matches!(
        again,
        CheckoutError::InvalidStatusTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Cancelled
        }
    ));
    assert_eq!(h.stock("P1").await, 5);

    // A retry of a cancelled checkout does not start over.
    let retry = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap_err();
    assert!(matches!(retry, CheckoutError::IdempotencyConflict(_)));
}

#[tokio::test]
async fn admin_cannot_ship_a_pending_order() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Wallet))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .admin_update_status(receipt.order.id, OrderStatus::Shipped)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::InvalidStatusTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped
        }
    ));
    let order = h
        .orchestrator
        .ledger()
        .get_order(receipt.order.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn admin_cancel_of_paid_order_refunds_through_gateway() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 2).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    let order = h
        .orchestrator
        .admin_update_status(receipt.order.id, OrderStatus::Cancelled)
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
    assert_eq!(h.gateway.refund_count().await, 1);
}

#[tokio::test]
async fn failed_refund_blocks_the_cancellation() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 2).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();
    h.gateway.set_fail_on_refund(true);

    let err = h
        .orchestrator
        .admin_update_status(receipt.order.id, OrderStatus::Cancelled)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::RefundFailed { .. }));
    let order = h
        .orchestrator
        .ledger()
        .get_order(receipt.order.id)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn admin_walks_order_through_fulfillment() {
    let h = TestHarness::new().await;
    h.add_to_cart("s1", "P1", 1).await;
    let receipt = h
        .orchestrator
        .checkout(request("s1", "key-1", PaymentMethod::Card))
        .await
        .unwrap();

    let shipped = h
        .orchestrator
        .admin_update_status(receipt.order.id, OrderStatus::Shipped)
        .await
        .unwrap();
    let completed = h
        .orchestrator
        .admin_update_status(receipt.order.id, OrderStatus::Completed)
        .await
        .unwrap();

    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(completed.status, OrderStatus::Completed);
    assert!(
        h.orchestrator
            .admin_update_status(receipt.order.id, OrderStatus::Cancelled)
            .await
            .is_err()
    );
}
