//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use checkout::{HttpPaymentGateway, InMemoryPaymentGateway, PaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::postgres::PgPoolOptions;
use storage::{InMemoryStore, PostgresStore, Storage};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve<S: Storage>(
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(store, gateway, config);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration, including an optional .env file
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Pick the payment gateway
    let gateway: Arc<dyn PaymentGateway> = match config.gateway_config() {
        Some(gateway_config) => {
            tracing::info!(base_url = %gateway_config.base_url, "using HTTP payment gateway");
            Arc::new(
                HttpPaymentGateway::new(gateway_config)
                    .expect("failed to build payment gateway client"),
            )
        }
        None => {
            tracing::warn!("PAYMENT_GATEWAY_URL not set, using the sandbox gateway");
            Arc::new(InMemoryPaymentGateway::new())
        }
    };

    // 5. Pick the store and start serving
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            serve(store, gateway, &config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            let store = InMemoryStore::with_products(api::demo_catalog()).await;
            serve(store, gateway, &config, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
