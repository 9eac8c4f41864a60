use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{OrderId, Version};
use domain::{
    CustomerId, Order, OrderLine, PaymentMethod, PaymentStatus, ProductId, RefundId, RefundRecord,
};

use crate::{
    Result, StoreError,
    repository::{OrderRepository, RefundLedger, StockLedger},
};

/// In-memory order repository for testing.
///
/// Provides the same optimistic-concurrency semantics as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        let mut stored = order.clone();
        stored.set_version(Version::first());
        orders.insert(order.id(), stored);
        Ok(Version::first())
    }

    async fn update(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id())
            .ok_or(StoreError::OrderNotFound(order.id()))?;

        if stored.version() != order.version() {
            return Err(StoreError::VersionConflict {
                order_id: order.id(),
                expected: order.version(),
                actual: stored.version(),
            });
        }

        let next = order.version().next();
        *stored = order.clone();
        stored.set_version(next);
        Ok(next)
    }

    async fn get(&self, id: OrderId) -> Result<Order> {
        self.find(id).await?.ok_or(StoreError::OrderNotFound(id))
    }

    async fn find(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: OrderId) -> Result<()> {
        let mut orders = self.orders.write().await;
        orders.remove(&id).ok_or(StoreError::OrderNotFound(id))?;
        Ok(())
    }

    async fn list_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders
            .values()
            .filter(|o| o.customer_id() == customer_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(matching)
    }

    async fn find_unverified_bank_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|o| {
                o.payment().method == PaymentMethod::Bank
                    && o.payment().status == PaymentStatus::Pending
                    && !o.order_state().is_terminal()
                    && o.created_at() < cutoff
            })
            .cloned()
            .collect())
    }
}

/// In-memory stock ledger for testing.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    inner: Arc<RwLock<StockState>>,
}

#[derive(Default)]
struct StockState {
    available: HashMap<ProductId, u32>,
    reservations: HashMap<OrderId, Vec<(ProductId, u32)>>,
}

impl InMemoryStockLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor seeding initial quantities.
    pub async fn with_stock(products: &[(&str, u32)]) -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.inner.write().await;
            for (product, quantity) in products {
                state.available.insert(ProductId::new(*product), *quantity);
            }
        }
        ledger
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn set_available(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        let mut state = self.inner.write().await;
        state.available.insert(product_id.clone(), quantity);
        Ok(())
    }

    async fn available(&self, product_id: &ProductId) -> Result<u32> {
        let state = self.inner.read().await;
        state
            .available
            .get(product_id)
            .copied()
            .ok_or_else(|| StoreError::UnknownProduct(product_id.clone()))
    }

    async fn reserve(&self, order_id: OrderId, lines: &[OrderLine]) -> Result<bool> {
        let mut state = self.inner.write().await;

        if state.reservations.contains_key(&order_id) {
            return Ok(false);
        }

        // Validate every line before touching any quantity.
        for line in lines {
            let available = state
                .available
                .get(&line.product_id)
                .copied()
                .ok_or_else(|| StoreError::UnknownProduct(line.product_id.clone()))?;
            if available < line.quantity {
                return Err(StoreError::InsufficientStock {
                    product_id: line.product_id.clone(),
                    requested: line.quantity,
                    available,
                });
            }
        }

        let mut held = Vec::with_capacity(lines.len());
        for line in lines {
            if let Some(available) = state.available.get_mut(&line.product_id) {
                *available -= line.quantity;
            }
            held.push((line.product_id.clone(), line.quantity));
        }
        state.reservations.insert(order_id, held);
        Ok(true)
    }

    async fn release(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.inner.write().await;
        let Some(held) = state.reservations.remove(&order_id) else {
            return Ok(false);
        };
        for (product_id, quantity) in held {
            *state.available.entry(product_id).or_insert(0) += quantity;
        }
        Ok(true)
    }
}

/// In-memory refund ledger for testing.
#[derive(Clone, Default)]
pub struct InMemoryRefundLedger {
    refunds: Arc<RwLock<Vec<RefundRecord>>>,
}

impl InMemoryRefundLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundLedger for InMemoryRefundLedger {
    async fn append(&self, refund: &RefundRecord) -> Result<()> {
        self.refunds.write().await.push(refund.clone());
        Ok(())
    }

    async fn update(&self, refund: &RefundRecord) -> Result<()> {
        let mut refunds = self.refunds.write().await;
        let stored = refunds
            .iter_mut()
            .find(|r| r.id == refund.id)
            .ok_or(StoreError::RefundNotFound(refund.id))?;
        *stored = refund.clone();
        Ok(())
    }

    async fn get(&self, id: RefundId) -> Result<RefundRecord> {
        let refunds = self.refunds.read().await;
        refunds
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::RefundNotFound(id))
    }

    async fn list_for_order(&self, order_id: OrderId) -> Result<Vec<RefundRecord>> {
        let refunds = self.refunds.read().await;
        Ok(refunds
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }
}
