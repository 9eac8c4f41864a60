//! HTTP API server for the order lifecycle engine.
//!
//! Exposes REST endpoints for order placement, payment callbacks,
//! fulfillment transitions, delivery outcomes, returns, refunds, and
//! stock administration, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use service::{Catalog, InMemoryCatalog, OrderService};
use store::{
    InMemoryOrderRepository, InMemoryRefundLedger, InMemoryStockLedger, OrderRepository,
    RefundLedger, StockLedger,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R, S, L, C>(
    state: Arc<AppState<R, S, L, C>>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    R: OrderRepository + 'static,
    S: StockLedger + 'static,
    L: RefundLedger + 'static,
    C: Catalog + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place::<R, S, L, C>))
        .route("/orders/{id}", get(routes::orders::get::<R, S, L, C>))
        .route("/orders/{id}", delete(routes::orders::delete::<R, S, L, C>))
        .route(
            "/orders/{id}/status",
            get(routes::orders::status::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/history",
            get(routes::orders::history::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/payment/callback",
            post(routes::orders::payment_callback::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/payment/verify-bank",
            post(routes::orders::verify_bank::<R, S, L, C>),
        )
        .route("/orders/{id}/pack", post(routes::orders::pack::<R, S, L, C>))
        .route(
            "/orders/{id}/dispatch",
            post(routes::orders::dispatch::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/out-for-delivery",
            post(routes::orders::out_for_delivery::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/deliver",
            post(routes::orders::deliver::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/delivery-outcome",
            post(routes::orders::delivery_outcome::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/redispatch",
            post(routes::orders::redispatch::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/cancel",
            post(routes::orders::cancel::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/returns",
            post(routes::orders::init_return::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/returns",
            patch(routes::orders::update_return::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/refunds",
            post(routes::orders::issue_refund::<R, S, L, C>),
        )
        .route(
            "/orders/{id}/refunds",
            get(routes::orders::list_refunds::<R, S, L, C>),
        )
        .route(
            "/refunds/{id}",
            patch(routes::orders::update_refund::<R, S, L, C>),
        )
        .route(
            "/customers/{id}/orders",
            get(routes::orders::list_for_customer::<R, S, L, C>),
        )
        .route("/stock/{product_id}", put(routes::stock::set::<R, S, L, C>))
        .route("/stock/{product_id}", get(routes::stock::get::<R, S, L, C>))
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

/// In-memory application state for tests and local development.
pub type MemoryState =
    AppState<InMemoryOrderRepository, InMemoryStockLedger, InMemoryRefundLedger, InMemoryCatalog>;

/// Creates application state backed entirely by in-memory stores.
pub fn create_memory_state(catalog: InMemoryCatalog) -> Arc<MemoryState> {
    let service = OrderService::new(
        InMemoryOrderRepository::new(),
        InMemoryStockLedger::new(),
        InMemoryRefundLedger::new(),
        catalog,
    );
    Arc::new(AppState {
        service: Arc::new(service),
    })
}
