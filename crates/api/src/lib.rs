//! HTTP API server for the storefront checkout.
//!
//! Exposes the session cart, stock availability, checkout, order queries,
//! admin status changes and the payment webhook, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use checkout::{CheckoutOrchestrator, PaymentGateway};
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use storage::{Product, Storage};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Storage>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/cart",
            get(routes::cart::get::<S>).delete(routes::cart::clear::<S>),
        )
        .route("/cart/items", post(routes::cart::add_item::<S>))
        .route(
            "/cart/items/{product_id}",
            put(routes::cart::update_item::<S>).delete(routes::cart::remove_item::<S>),
        )
        .route(
            "/inventory/{product_id}/availability",
            get(routes::inventory::availability::<S>),
        )
        .route("/checkout", post(routes::checkout::create::<S>))
        .route(
            "/checkout/{order_id}/confirm",
            post(routes::checkout::confirm::<S>),
        )
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/admin/orders/{id}/status",
            put(routes::admin::update_status::<S>),
        )
        .route(
            "/admin/orders/{id}/payment-status",
            put(routes::admin::update_payment_status::<S>),
        )
        .route("/webhooks/payments", post(routes::webhooks::payments::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the checkout orchestrator over `store` and `gateway`.
pub fn create_state<S: Storage>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    config: &Config,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        checkout: CheckoutOrchestrator::new(store, gateway, config.checkout_config()),
        admin_token: config.admin_token.clone(),
    })
}

/// Products seeded into the in-memory store when no database is configured.
pub fn demo_catalog() -> Vec<Product> {
    vec![
        Product::new("SKU-TSHIRT", "Logo T-Shirt", Money::from_cents(2000), 50),
        Product::new("SKU-MUG", "Coffee Mug", Money::from_cents(1250), 25),
        Product::new("SKU-POSTER", "Limited Poster", Money::from_cents(4500), 3),
    ]
}
