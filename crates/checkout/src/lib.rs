//! Checkout saga for the storefront.
//!
//! This crate turns a session cart into a paid order:
//! 1. Read the cart and re-price it from the catalog
//! 2. Reserve stock, all or nothing
//! 3. Write a PENDING order
//! 4. Open and capture the payment
//! 5. Clear the cart
//!
//! A failed order write releases the reservation. Gateway failures leave
//! the order PENDING for a later capture, webhook or cancellation.

pub mod config;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod steps;
pub mod webhook;

pub use config::CheckoutConfig;
pub use error::{CheckoutError, Result};
pub use gateway::{
    CaptureResult, GatewayError, GatewayLineItem, HttpGatewayConfig, HttpPaymentGateway,
    InMemoryPaymentGateway, IntentRef, IntentRequest, PaymentGateway,
};
pub use orchestrator::{
    CheckoutOrchestrator, CheckoutReceipt, CheckoutRequest, PaymentOutcome, WebhookOutcome,
};
pub use webhook::{SIGNATURE_HEADER, WebhookError, WebhookEvent, WebhookEventType, WebhookVerifier};
