//! Sandbox gateway for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{IdempotencyKey, Money, PaymentMethod};
use tokio::sync::Mutex;

use super::{CaptureResult, GatewayError, IntentRef, IntentRequest, PaymentGateway};

#[derive(Debug, Clone)]
struct SandboxIntent {
    amount: Money,
    captured: Option<String>,
    refunded: bool,
}

#[derive(Debug, Default)]
struct SandboxState {
    intents: HashMap<String, SandboxIntent>,
    intents_by_key: HashMap<IdempotencyKey, String>,
    next_id: u32,
    capture_calls: usize,
    refunds: usize,
}

/// In-memory payment gateway.
///
/// Intents are idempotent per idempotency key and captures per intent. Fault
/// knobs simulate outages, declines and slow responses.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<SandboxState>>,
    fail_on_create_intent: Arc<AtomicBool>,
    fail_on_capture: Arc<AtomicBool>,
    decline_captures: Arc<AtomicBool>,
    fail_on_refund: Arc<AtomicBool>,
    capture_delay_ms: Arc<AtomicU64>,
}

impl InMemoryPaymentGateway {
    /// Creates a new sandbox gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes intent creation answer 503.
    pub fn set_fail_on_create_intent(&self, fail: bool) {
        self.fail_on_create_intent.store(fail, Ordering::SeqCst);
    }

    /// Makes captures answer 503.
    pub fn set_fail_on_capture(&self, fail: bool) {
        self.fail_on_capture.store(fail, Ordering::SeqCst);
    }

    /// Makes captures come back declined.
    pub fn set_decline_captures(&self, decline: bool) {
        self.decline_captures.store(decline, Ordering::SeqCst);
    }

    pub fn set_fail_on_refund(&self, fail: bool) {
        self.fail_on_refund.store(fail, Ordering::SeqCst);
    }

    /// Delays every capture response.
    pub fn set_capture_delay(&self, delay: Duration) {
        self.capture_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Returns the number of intents created.
    pub async fn intent_count(&self) -> usize {
        self.state.lock().await.intents.len()
    }

    /// Returns the number of capture calls received.
    pub async fn capture_calls(&self) -> usize {
        self.state.lock().await.capture_calls
    }

    pub async fn refund_count(&self) -> usize {
        self.state.lock().await.refunds
    }

    /// Returns true if the intent's funds were captured.
    pub async fn is_captured(&self, intent_id: &str) -> bool {
        self.state
            .lock()
            .await
            .intents
            .get(intent_id)
            .is_some_and(|i| i.captured.is_some())
    }

    /// Captures an intent out of band, as a buyer approving a wallet payment
    /// or a late asynchronous capture would. Returns the capture ID.
    pub async fn capture_out_of_band(&self, intent_id: &str) -> Result<String, GatewayError> {
        let mut state = self.state.lock().await;
        capture_intent(&mut state, intent_id)
    }
}

fn capture_intent(state: &mut SandboxState, intent_id: &str) -> Result<String, GatewayError> {
    let intent = state
        .intents
        .get_mut(intent_id)
        .ok_or_else(|| GatewayError::Rejected(format!("no such intent: {intent_id}")))?;

    if let Some(capture_id) = &intent.captured {
        return Ok(capture_id.clone());
    }
    let capture_id = format!("cap_{}", intent_id.trim_start_matches("pi_"));
    intent.captured = Some(capture_id.clone());
    Ok(capture_id)
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentRef, GatewayError> {
        if self.fail_on_create_intent.load(Ordering::SeqCst) {
            return Err(GatewayError::Server {
                status: 503,
                body: "intent service unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().await;

        let id = match state.intents_by_key.get(&request.idempotency_key) {
            Some(existing) => existing.clone(),
            None => {
                state.next_id += 1;
                let id = format!("pi_{:06}", state.next_id);
                state.intents.insert(
                    id.clone(),
                    SandboxIntent {
                        amount: request.amount,
                        captured: None,
                        refunded: false,
                    },
                );
                state
                    .intents_by_key
                    .insert(request.idempotency_key.clone(), id.clone());
                id
            }
        };

        let approval_url = match request.method {
            PaymentMethod::Wallet => Some(format!("https://sandbox.pay.test/approve/{id}")),
            PaymentMethod::Card => None,
        };

        Ok(IntentRef { id, approval_url })
    }

    async fn capture(
        &self,
        intent_id: &str,
        _idempotency_key: &IdempotencyKey,
    ) -> Result<CaptureResult, GatewayError> {
        let delay = self.capture_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut state = self.state.lock().await;
        state.capture_calls += 1;

        if self.fail_on_capture.load(Ordering::SeqCst) {
            return Err(GatewayError::Server {
                status: 503,
                body: "capture service unavailable".to_string(),
            });
        }
        if self.decline_captures.load(Ordering::SeqCst) {
            return Ok(CaptureResult::declined("card_declined"));
        }

        capture_intent(&mut state, intent_id).map(CaptureResult::captured)
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<String, GatewayError> {
        if self.fail_on_refund.load(Ordering::SeqCst) {
            return Err(GatewayError::Server {
                status: 503,
                body: "refund service unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().await;
        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::Rejected(format!("no such intent: {intent_id}")))?;

        if intent.captured.is_none() {
            return Err(GatewayError::Rejected(format!(
                "intent {intent_id} has no captured funds"
            )));
        }
        if amount > intent.amount {
            return Err(GatewayError::Rejected(format!(
                "refund of {amount} exceeds captured {}",
                intent.amount
            )));
        }

        let first_refund = !intent.refunded;
        intent.refunded = true;
        if first_refund {
            state.refunds += 1;
        }
        Ok(format!("re_{intent_id}"))
    }
}
