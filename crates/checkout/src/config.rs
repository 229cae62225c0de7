use std::time::Duration;

use domain::cart::DEFAULT_CART_TTL;

/// Settings of the checkout orchestrator.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Bound on every payment gateway call.
    pub payment_timeout: Duration,

    /// ISO 4217 code every order is charged in.
    pub currency: String,

    /// Sliding expiry of session carts.
    pub cart_ttl: Duration,

    /// Shared secret the gateway signs webhooks with.
    pub webhook_secret: String,

    /// Largest accepted distance between a webhook's timestamp and now.
    pub webhook_tolerance: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(10),
            currency: "USD".to_string(),
            cart_ttl: DEFAULT_CART_TTL,
            webhook_secret: "whsec_dev".to_string(),
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}
