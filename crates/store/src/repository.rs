use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{OrderId, Version};
use domain::{CustomerId, Order, OrderLine, ProductId, RefundId, RefundRecord};

use crate::Result;

/// Storage for order aggregates with optimistic concurrency control.
///
/// Every write carries the version the caller loaded; a mismatched version
/// fails with `VersionConflict` and writes nothing. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts a freshly placed order.
    ///
    /// Returns the stored version; the caller applies it to the aggregate
    /// with [`Order::set_version`].
    async fn insert(&self, order: &Order) -> Result<Version>;

    /// Persists a mutated order, expecting the stored row to still be at
    /// `order.version()`. Fails with `VersionConflict` otherwise.
    ///
    /// Returns the new version.
    async fn update(&self, order: &Order) -> Result<Version>;

    /// Loads an order, failing with `OrderNotFound` if absent.
    async fn get(&self, id: OrderId) -> Result<Order>;

    /// Loads an order, returning None if absent.
    async fn find(&self, id: OrderId) -> Result<Option<Order>>;

    /// Deletes an order. The service layer enforces that only pre-dispatch
    /// orders may be deleted.
    async fn delete(&self, id: OrderId) -> Result<()>;

    /// All orders for a customer, newest first.
    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    /// Non-terminal BANK orders still awaiting slip verification that were
    /// placed before `cutoff`. Feeds the expiry sweep.
    async fn find_unverified_bank_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}

/// Stock ledger with atomic, idempotent reservations.
///
/// A reservation is keyed by order id; re-reserving for the same order is
/// a no-op, and releasing an order that holds nothing is a no-op. Both
/// directions are safe to retry.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Creates or replaces the available quantity for a product.
    async fn set_available(&self, product_id: &ProductId, quantity: u32) -> Result<()>;

    /// Current available quantity, failing with `UnknownProduct` if the
    /// product has no stock row.
    async fn available(&self, product_id: &ProductId) -> Result<u32>;

    /// Atomically reserves stock for every line of an order.
    ///
    /// All lines succeed or none do: one short line fails the whole call
    /// with `InsufficientStock` and leaves every quantity untouched.
    /// Returns false (and holds nothing extra) when a reservation for this
    /// order already exists.
    async fn reserve(&self, order_id: OrderId, lines: &[OrderLine]) -> Result<bool>;

    /// Returns every quantity held for this order to the pool and drops
    /// the reservation. Returns false when the order held nothing.
    async fn release(&self, order_id: OrderId) -> Result<bool>;
}

/// Append-oriented ledger of refund records, keyed by order.
///
/// Refunds are independent of return status: one order may accumulate
/// several records (partial refunds, payout retries, goodwill).
#[async_trait]
pub trait RefundLedger: Send + Sync {
    /// Appends a new refund record.
    async fn append(&self, refund: &RefundRecord) -> Result<()>;

    /// Persists a status change to an existing record, failing with
    /// `RefundNotFound` if absent.
    async fn update(&self, refund: &RefundRecord) -> Result<()>;

    /// Loads a refund record, failing with `RefundNotFound` if absent.
    async fn get(&self, id: RefundId) -> Result<RefundRecord>;

    /// All refund records for an order, oldest first.
    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<RefundRecord>>;
}
