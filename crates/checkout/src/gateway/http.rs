//! JSON-over-HTTPS payment gateway client.

use std::time::Duration;

use async_trait::async_trait;
use common::{IdempotencyKey, Money};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{CaptureResult, GatewayError, IntentRef, IntentRequest, PaymentGateway};

/// Configuration for connecting to the payment gateway.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Base URL, e.g. `"https://api.payments.example"`.
    pub base_url: String,

    /// Server-held secret sent as a bearer token.
    pub secret_key: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

/// HTTP client for the payment gateway's intent, capture and refund API.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    config: HttpGatewayConfig,
    http: Client,
}

impl HttpPaymentGateway {
    /// Create a new client from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.config.timeout)
        } else {
            GatewayError::from(e)
        }
    }

    async fn error_for(response: Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            GatewayError::Server {
                status: status.as_u16(),
                body,
            }
        } else {
            GatewayError::Rejected(format!("status {status}: {body}"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    capture_id: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<IntentRef, GatewayError> {
        let body = serde_json::json!({
            "amount": request.amount.cents(),
            "currency": request.currency,
            "method": request.method,
            "reference": request.order_id,
            "line_items": request.line_items,
        });

        let response = self
            .http
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        Ok(response.json().await?)
    }

    async fn capture(
        &self,
        intent_id: &str,
        idempotency_key: &IdempotencyKey,
    ) -> Result<CaptureResult, GatewayError> {
        let response = self
            .http
            .post(self.url(&format!("/v1/payment_intents/{intent_id}/capture")))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", format!("{}:capture", idempotency_key))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == StatusCode::PAYMENT_REQUIRED {
            let body = response.text().await.unwrap_or_default();
            return Ok(CaptureResult::declined(body));
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let parsed: CaptureResponse = response.json().await?;
        match parsed.status.as_str() {
            "succeeded" => Ok(CaptureResult {
                success: true,
                external_capture_id: parsed.capture_id,
                failure_reason: None,
            }),
            "declined" | "failed" => Ok(CaptureResult::declined(
                parsed.failure_reason.unwrap_or(parsed.status),
            )),
            other => Err(GatewayError::UnexpectedResponse(format!(
                "unknown capture status '{other}'"
            ))),
        }
    }

    async fn refund(&self, intent_id: &str, amount: Money) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "payment_intent": intent_id,
            "amount": amount.cents(),
        });

        let response = self
            .http
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.config.secret_key)
            .header("Idempotency-Key", format!("refund:{intent_id}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let parsed: RefundResponse = response.json().await?;
        Ok(parsed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base_url: &str) -> HttpPaymentGateway {
        HttpPaymentGateway::new(HttpGatewayConfig {
            base_url: base_url.to_string(),
            secret_key: "sk_test".to_string(),
            timeout: Duration::from_millis(200),
        })
        .unwrap()
    }

    #[test]
    fn url_joins_without_double_slash() {
        let gateway = gateway("https://pay.example/");
        assert_eq!(
            gateway.url("/v1/refunds"),
            "https://pay.example/v1/refunds"
        );
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_network_error() {
        // Port 9 (discard) on localhost is not expected to accept connections.
        let gateway = gateway("http://127.0.0.1:9");

        let err = gateway
            .capture("pi_1", &IdempotencyKey::new("k"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Network(_) | GatewayError::Timeout(_)
        ));
    }
}
