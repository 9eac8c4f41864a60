//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and serialize on it.
//! Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{OrderId, Version};
use domain::{
    AddressSnapshot, CustomerId, Money, Order, OrderLine, PaymentMethod, RefundRecord,
    RefundStatus,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    OrderRepository, PostgresOrderRepository, PostgresRefundLedger, PostgresStockLedger,
    RefundLedger, StockLedger, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

struct TestStore {
    orders: PostgresOrderRepository,
    stock: PostgresStockLedger,
    refunds: PostgresRefundLedger,
}

/// Get fresh stores over one pool with cleared tables
async fn get_test_store() -> TestStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE orders, stock_reservations, stock, refunds")
        .execute(&pool)
        .await
        .unwrap();

    TestStore {
        orders: PostgresOrderRepository::new(pool.clone()),
        stock: PostgresStockLedger::new(pool.clone()),
        refunds: PostgresRefundLedger::new(pool),
    }
}

fn test_lines() -> Vec<OrderLine> {
    vec![
        OrderLine::new("SKU-001", "widget", "Widget", Money::from_cents(1000), 2),
        OrderLine::new("SKU-002", "gadget", "Gadget", Money::from_cents(500), 1),
    ]
}

fn place_order_at(method: PaymentMethod, placed_at: chrono::DateTime<Utc>) -> Order {
    Order::place(
        OrderId::new(),
        CustomerId::new(),
        test_lines(),
        AddressSnapshot::default(),
        Money::from_cents(300),
        Money::zero(),
        method,
        placed_at,
    )
    .unwrap()
}

fn place_order(method: PaymentMethod) -> Order {
    place_order_at(method, Utc::now())
}

async fn seed_stock(store: &TestStore) {
    store.stock.set_available(&"SKU-001".into(), 10).await.unwrap();
    store.stock.set_available(&"SKU-002".into(), 5).await.unwrap();
}

#[tokio::test]
#[serial]
async fn insert_and_load_order() {
    let store = get_test_store().await;
    let mut order = place_order(PaymentMethod::Cod);

    let version = store.orders.insert(&order).await.unwrap();
    assert_eq!(version, Version::first());
    order.set_version(version);

    let loaded = store.orders.get(order.id()).await.unwrap();
    assert_eq!(loaded.id(), order.id());
    assert_eq!(loaded.order_state(), order.order_state());
    assert_eq!(loaded.version(), Version::first());
    assert_eq!(loaded.lines().len(), 2);
    assert_eq!(loaded.totals().grand_total, order.totals().grand_total);
}

#[tokio::test]
#[serial]
async fn update_checks_version() {
    let store = get_test_store().await;
    let mut order = place_order(PaymentMethod::Cod);
    order.set_version(store.orders.insert(&order).await.unwrap());

    order.mark_stock_reserved();
    let next = store.orders.update(&order).await.unwrap();
    assert_eq!(next, Version::first().next());
    order.set_version(next);

    // A writer with the stale version loses.
    let mut stale = store.orders.get(order.id()).await.unwrap();
    stale.set_version(Version::first());
    let result = store.orders.update(&stale).await;
    assert!(matches!(result, Err(StoreError::VersionConflict { .. })));

    // The current version still wins.
    store.orders.update(&order).await.unwrap();
}

#[tokio::test]
#[serial]
async fn update_missing_order_fails() {
    let store = get_test_store().await;
    let mut order = place_order(PaymentMethod::Cod);
    order.set_version(Version::first());

    let result = store.orders.update(&order).await;
    assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
}

#[tokio::test]
#[serial]
async fn delete_order() {
    let store = get_test_store().await;
    let order = place_order(PaymentMethod::Cod);
    store.orders.insert(&order).await.unwrap();

    store.orders.delete(order.id()).await.unwrap();
    assert!(store.orders.find(order.id()).await.unwrap().is_none());

    let result = store.orders.delete(order.id()).await;
    assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
}

#[tokio::test]
#[serial]
async fn list_for_customer_newest_first() {
    let store = get_test_store().await;
    let customer = CustomerId::new();

    let mut first = Order::place(
        OrderId::new(),
        customer,
        test_lines(),
        AddressSnapshot::default(),
        Money::zero(),
        Money::zero(),
        PaymentMethod::Cod,
        Utc::now() - Duration::minutes(5),
    )
    .unwrap();
    first.set_version(store.orders.insert(&first).await.unwrap());

    let second = Order::place(
        OrderId::new(),
        customer,
        test_lines(),
        AddressSnapshot::default(),
        Money::zero(),
        Money::zero(),
        PaymentMethod::Card,
        Utc::now(),
    )
    .unwrap();
    store.orders.insert(&second).await.unwrap();

    // Unrelated customer.
    store.orders.insert(&place_order(PaymentMethod::Cod)).await.unwrap();

    let listed = store.orders.list_for_customer(customer).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id(), second.id());
    assert_eq!(listed[1].id(), first.id());
}

#[tokio::test]
#[serial]
async fn sweep_query_matches_only_stale_bank_orders() {
    let store = get_test_store().await;

    let stale_bank = place_order_at(PaymentMethod::Bank, Utc::now() - Duration::hours(48));
    store.orders.insert(&stale_bank).await.unwrap();

    // Fresh bank order, stale COD order: neither qualifies.
    store.orders.insert(&place_order(PaymentMethod::Bank)).await.unwrap();
    let old_cod = place_order_at(PaymentMethod::Cod, Utc::now() - Duration::hours(48));
    store.orders.insert(&old_cod).await.unwrap();

    let cutoff = Utc::now() - Duration::hours(24);
    let stale = store.orders.find_unverified_bank_orders(cutoff).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id(), stale_bank.id());
}

#[tokio::test]
#[serial]
async fn reserve_and_release_roundtrip() {
    let store = get_test_store().await;
    seed_stock(&store).await;
    let order_id = OrderId::new();

    assert!(store.stock.reserve(order_id, &test_lines()).await.unwrap());
    assert_eq!(store.stock.available(&"SKU-001".into()).await.unwrap(), 8);
    assert_eq!(store.stock.available(&"SKU-002".into()).await.unwrap(), 4);

    assert!(store.stock.release(order_id).await.unwrap());
    assert_eq!(store.stock.available(&"SKU-001".into()).await.unwrap(), 10);
    assert_eq!(store.stock.available(&"SKU-002".into()).await.unwrap(), 5);
}

#[tokio::test]
#[serial]
async fn reserve_rolls_back_on_short_line() {
    let store = get_test_store().await;
    store.stock.set_available(&"SKU-001".into(), 10).await.unwrap();
    store.stock.set_available(&"SKU-002".into(), 0).await.unwrap();

    let result = store.stock.reserve(OrderId::new(), &test_lines()).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientStock {
            requested: 1,
            available: 0,
            ..
        })
    ));

    // The first line's deduction was rolled back with the transaction.
    assert_eq!(store.stock.available(&"SKU-001".into()).await.unwrap(), 10);
}

#[tokio::test]
#[serial]
async fn reserve_retry_holds_nothing_extra() {
    let store = get_test_store().await;
    seed_stock(&store).await;
    let order_id = OrderId::new();

    assert!(store.stock.reserve(order_id, &test_lines()).await.unwrap());
    assert!(!store.stock.reserve(order_id, &test_lines()).await.unwrap());
    assert_eq!(store.stock.available(&"SKU-001".into()).await.unwrap(), 8);

    // Release is likewise safe to retry.
    assert!(store.stock.release(order_id).await.unwrap());
    assert!(!store.stock.release(order_id).await.unwrap());
    assert_eq!(store.stock.available(&"SKU-001".into()).await.unwrap(), 10);
}

#[tokio::test]
#[serial]
async fn reserve_unknown_product_fails() {
    let store = get_test_store().await;

    let result = store.stock.reserve(OrderId::new(), &test_lines()).await;
    assert!(matches!(result, Err(StoreError::UnknownProduct(_))));
}

#[tokio::test]
#[serial]
async fn available_unknown_product_fails() {
    let store = get_test_store().await;

    let result = store.stock.available(&"SKU-404".into()).await;
    assert!(matches!(result, Err(StoreError::UnknownProduct(_))));
}

#[tokio::test]
#[serial]
async fn refund_ledger_roundtrip() {
    let store = get_test_store().await;
    let order_id = OrderId::new();

    let mut refund = RefundRecord::new(
        order_id,
        PaymentMethod::Card,
        Money::from_cents(2500),
        Some("carton damaged".into()),
        Utc::now(),
    );
    store.refunds.append(&refund).await.unwrap();

    refund.advance(RefundStatus::Approved, Utc::now()).unwrap();
    store.refunds.update(&refund).await.unwrap();

    let fetched = store.refunds.get(refund.id).await.unwrap();
    assert_eq!(fetched.status, RefundStatus::Approved);
    assert_eq!(fetched.amount, Money::from_cents(2500));

    let listed = store.refunds.list_for_order(order_id).await.unwrap();
    assert_eq!(listed.len(), 1);
}

#[tokio::test]
#[serial]
async fn refund_update_missing_record_fails() {
    let store = get_test_store().await;
    let refund = RefundRecord::new(
        OrderId::new(),
        PaymentMethod::Cod,
        Money::from_cents(500),
        None,
        Utc::now(),
    );

    let result = store.refunds.update(&refund).await;
    assert!(matches!(result, Err(StoreError::RefundNotFound(_))));
}
