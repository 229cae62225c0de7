//! Payment webhook authenticity and parsing.
//!
//! The gateway signs every delivery with HMAC-SHA256 over
//! `"{timestamp}.{body}"` and sends `x-payment-signature: t=<unix>,v1=<hex>`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Errors that can occur while accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Malformed signature header")]
    MalformedSignature,

    /// The signed timestamp is too far from now; likely a replay.
    #[error("Signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    #[error("Signature does not match payload")]
    SignatureMismatch,

    /// The configured secret cannot key the MAC.
    #[error("Invalid webhook secret")]
    InvalidKey,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Verifies webhook signatures with a shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    /// Checks `header` against `payload` at time `now` (unix seconds).
    ///
    /// The comparison is constant-time.
    pub fn verify(&self, header: &str, payload: &[u8], now: i64) -> Result<(), WebhookError> {
        if header.trim().is_empty() {
            return Err(WebhookError::MissingSignature);
        }

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| WebhookError::MalformedSignature)?,
                    )
                }
                Some(("v1", value)) => signatures.push(value),
                Some(_) => {}
                None => return Err(WebhookError::MalformedSignature),
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedSignature);
        }
        if now.abs_diff(timestamp) > self.tolerance.as_secs() {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        for signature in signatures {
            let Ok(expected) = hex::decode(signature) else {
                continue;
            };
            if self.mac(timestamp, payload)?.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(WebhookError::SignatureMismatch)
    }

    /// Produces the header value the gateway would send for `payload`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, WebhookError> {
        let signature = hex::encode(self.mac(timestamp, payload)?.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| WebhookError::InvalidKey)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

/// Kind of webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum WebhookEventType {
    #[serde(rename = "payment.captured")]
    PaymentCaptured,

    #[serde(rename = "payment.failed")]
    PaymentFailed,

    /// Anything else; acknowledged and ignored.
    #[serde(other)]
    Other,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentCaptured => "payment.captured",
            WebhookEventType::PaymentFailed => "payment.failed",
            WebhookEventType::Other => "other",
        }
    }
}

/// Payment fields of a delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayment {
    pub intent_id: String,
    #[serde(default)]
    pub capture_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

/// A parsed webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Unique per event; repeated on redelivery.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: WebhookEventType,
    pub data: WebhookPayment,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
