//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CheckoutConfig, HttpGatewayConfig};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `DATABASE_URL` — Postgres connection string; unset runs in memory
/// - `CART_TTL_SECS` — cart expiry (default: 7 days)
/// - `PAYMENT_TIMEOUT_MS` — bound on gateway calls (default: `10000`)
/// - `CURRENCY` — charge currency (default: `"USD"`)
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_GATEWAY_SECRET` — HTTP gateway; unset
///   uses the sandbox gateway
/// - `PAYMENT_WEBHOOK_SECRET` — webhook HMAC key (default: `"whsec_dev"`)
/// - `WEBHOOK_TOLERANCE_SECS` — webhook timestamp skew (default: `300`)
/// - `ADMIN_TOKEN` — `x-admin-token` value granting admin rights
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub cart_ttl: Duration,
    pub payment_timeout: Duration,
    pub currency: String,
    pub gateway_url: Option<String>,
    pub gateway_secret: String,
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub admin_token: String,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| var(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: var("DATABASE_URL").filter(|url| !url.is_empty()),
            cart_ttl: parsed("CART_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cart_ttl),
            payment_timeout: parsed("PAYMENT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.payment_timeout),
            currency: var("CURRENCY").unwrap_or(defaults.currency),
            gateway_url: var("PAYMENT_GATEWAY_URL").filter(|url| !url.is_empty()),
            gateway_secret: var("PAYMENT_GATEWAY_SECRET").unwrap_or(defaults.gateway_secret),
            webhook_secret: var("PAYMENT_WEBHOOK_SECRET").unwrap_or(defaults.webhook_secret),
            webhook_tolerance: parsed("WEBHOOK_TOLERANCE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
            admin_token: var("ADMIN_TOKEN").unwrap_or(defaults.admin_token),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The orchestrator's slice of the configuration.
    pub fn checkout_config(&self) -> CheckoutConfig {
        CheckoutConfig {
            payment_timeout: self.payment_timeout,
            currency: self.currency.clone(),
            cart_ttl: self.cart_ttl,
            webhook_secret: self.webhook_secret.clone(),
            webhook_tolerance: self.webhook_tolerance,
        }
    }

    /// Settings for the HTTP gateway, if one is configured.
    pub fn gateway_config(&self) -> Option<HttpGatewayConfig> {
        self.gateway_url.as_ref().map(|url| HttpGatewayConfig {
            base_url: url.clone(),
            secret_key: self.gateway_secret.clone(),
            timeout: self.payment_timeout,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let checkout = CheckoutConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            cart_ttl: checkout.cart_ttl,
            payment_timeout: checkout.payment_timeout,
            currency: checkout.currency,
            gateway_url: None,
            gateway_secret: String::new(),
            webhook_secret: checkout.webhook_secret,
            webhook_tolerance: checkout.webhook_tolerance,
            admin_token: "admin-dev-token".to_string(),
        }
    }
}
