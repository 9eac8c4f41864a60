//! API server entry point.

use std::sync::Arc;

use service::{InMemoryCatalog, OrderService};
use store::{PostgresOrderRepository, PostgresRefundLedger, PostgresStockLedger};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::config::Config;
use api::routes::orders::AppState;

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

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // The catalog is an external concern in production; the in-process
    // implementation ships so the server is usable standalone.
    let catalog = InMemoryCatalog::new();

    let app = match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            store::run_migrations(&pool)
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL storage");

            let service = Arc::new(OrderService::new(
                PostgresOrderRepository::new(pool.clone()),
                PostgresStockLedger::new(pool.clone()),
                PostgresRefundLedger::new(pool),
                catalog,
            ));
            service::spawn_bank_expiry_sweep(
                service.clone(),
                config.bank_sweep_interval,
                chrono::Duration::hours(config.bank_verification_hours),
            );
            let state = Arc::new(AppState { service });
            api::create_app(state, metrics_handle)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage");
            let state = api::create_memory_state(catalog);
            service::spawn_bank_expiry_sweep(
                state.service.clone(),
                config.bank_sweep_interval,
                chrono::Duration::hours(config.bank_verification_hours),
            );
            api::create_app(state, metrics_handle)
        }
    };

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}
