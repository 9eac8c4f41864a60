//! Order orchestration: placement, lifecycle transitions, returns,
//! refunds, and the bank-expiry sweep entry point.
//!
//! Every mutation follows the same shape: load the aggregate, apply the
//! intent (which validates its own guards), persist with the loaded
//! version, and on a version conflict reload and re-derive the intent.
//! Stock effects sit outside the document write, so they are idempotent
//! per order and safe to repeat across retries.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use common::OrderId;
use domain::{
    AddressSnapshot, AgentId, CustomerId, DeliveryEvidence, DeliveryOutcome, GatewayOutcome, Money,
    Order, OrderError, OrderLine, OutcomeReason, PaymentMethod, ProductId, RefundId, RefundRecord,
    RefundStatus, ReturnStatus, StatusEntry,
};
use store::{OrderRepository, RefundLedger, StockLedger, StoreError};

use crate::catalog::Catalog;
use crate::error::{Result, ServiceError};

/// How many times a conflicted write is re-derived before giving up.
const MAX_RETRIES: u32 = 3;

/// One requested line in a placement request; the price and display
/// fields are resolved from the catalog, never trusted from the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A request to place a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: CustomerId,
    pub lines: Vec<LineItemRequest>,
    pub address: AddressSnapshot,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub discount: Money,
    pub payment_method: PaymentMethod,
}

/// Orchestrates order intents across the repository, stock ledger,
/// refund ledger, and catalog.
pub struct OrderService<R, S, L, C>
where
    R: OrderRepository,
    S: StockLedger,
    L: RefundLedger,
    C: Catalog,
{
    orders: R,
    stock: S,
    refunds: L,
    catalog: C,
}

impl<R, S, L, C> OrderService<R, S, L, C>
where
    R: OrderRepository,
    S: StockLedger,
    L: RefundLedger,
    C: Catalog,
{
    /// Creates a new order service.
    pub fn new(orders: R, stock: S, refunds: L, catalog: C) -> Self {
        Self {
            orders,
            stock,
            refunds,
            catalog,
        }
    }

    /// Places a new order.
    ///
    /// Lines are snapshotted from the catalog at this moment. COD and
    /// BANK orders reserve stock here; CARD orders defer reservation to
    /// the gateway confirmation.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<Order> {
        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let info = self
                .catalog
                .product(&line.product_id)
                .await?
                .ok_or_else(|| ServiceError::UnknownProduct(line.product_id.clone()))?;
            lines.push(OrderLine::new(
                info.product_id,
                info.slug,
                info.name,
                info.unit_price,
                line.quantity,
            ));
        }

        let mut order = Order::place(
            OrderId::new(),
            request.customer_id,
            lines,
            request.address,
            request.shipping,
            request.discount,
            request.payment_method,
            Utc::now(),
        )?;

        let mut reserved = false;
        if request.payment_method.reserves_at_placement() {
            self.stock.reserve(order.id(), order.lines()).await?;
            order.mark_stock_reserved();
            reserved = true;
        }

        match self.orders.insert(&order).await {
            Ok(version) => order.set_version(version),
            Err(err) => {
                if reserved {
                    self.release_quietly(order.id()).await;
                }
                return Err(err.into());
            }
        }

        metrics::counter!("orders_placed_total", "method" => request.payment_method.as_str())
            .increment(1);
        tracing::info!(order_id = %order.id(), state = %order.order_state(), "order placed");
        Ok(order)
    }

    /// Applies a payment gateway callback to a CARD order.
    ///
    /// A PAID outcome confirms the order and takes the deferred stock
    /// reservation. If stock ran out between placement and payment, the
    /// order is cancelled and a refund record is opened for the captured
    /// amount.
    #[tracing::instrument(skip(self, gateway_ref))]
    pub async fn apply_gateway_callback(
        &self,
        order_id: OrderId,
        outcome: GatewayOutcome,
        gateway_ref: Option<String>,
    ) -> Result<Order> {
        let mut attempts = 0;
        loop {
            let now = Utc::now();
            let mut order = self.load(order_id).await?;
            let change = order.apply_gateway_callback(outcome, gateway_ref.clone(), now)?;

            let mut refund = None;
            if change.reserve_stock {
                match self.stock.reserve(order.id(), order.lines()).await {
                    Ok(_) => order.mark_stock_reserved(),
                    Err(StoreError::InsufficientStock { product_id, .. }) => {
                        // Payment is captured but the goods are gone.
                        tracing::warn!(%order_id, %product_id, "paid order cannot be stocked");
                        order.cancel(Some(OutcomeReason::from_code("OUT_OF_STOCK")), now)?;
                        refund = Some(RefundRecord::new(
                            order.id(),
                            order.payment().method,
                            order.totals().grand_total,
                            Some("stock unavailable after payment capture".into()),
                            now,
                        ));
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            if !self.persist(&mut order, &mut attempts).await? {
                continue;
            }

            // The refund record is opened only once the cancellation is
            // durable; a conflicted retry must not append it twice.
            if let Some(refund) = refund {
                self.refunds.append(&refund).await?;
                metrics::counter!("orders_cancelled_total", "cause" => "out_of_stock")
                    .increment(1);
            }
            return Ok(order);
        }
    }

    /// Verifies a bank-transfer slip, settling the payment.
    #[tracing::instrument(skip(self, slip_ref))]
    pub async fn verify_bank_slip(&self, order_id: OrderId, slip_ref: String) -> Result<Order> {
        self.mutate(order_id, |order, now| {
            order.verify_bank_slip(slip_ref.clone(), now).map(|_| ())
        })
        .await
    }

    /// Starts packing a confirmed order.
    #[tracing::instrument(skip(self))]
    pub async fn pack_order(&self, order_id: OrderId) -> Result<Order> {
        self.mutate(order_id, |order, now| order.pack(now)).await
    }

    /// Hands the order to a delivery agent.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch_order(&self, order_id: OrderId, agent: AgentId) -> Result<Order> {
        self.mutate(order_id, |order, now| order.dispatch(agent, now))
            .await
    }

    /// Marks the order out on a delivery run.
    #[tracing::instrument(skip(self))]
    pub async fn start_delivery_run(&self, order_id: OrderId) -> Result<Order> {
        self.mutate(order_id, |order, now| order.start_delivery_run(now))
            .await
    }

    /// Closes a delivery with proof-of-delivery evidence.
    #[tracing::instrument(skip(self, evidence))]
    pub async fn deliver_order(
        &self,
        order_id: OrderId,
        evidence: DeliveryEvidence,
    ) -> Result<Order> {
        let order = self
            .mutate(order_id, |order, now| {
                order.deliver(evidence.clone(), now)
            })
            .await?;
        metrics::counter!("orders_delivered_total").increment(1);
        Ok(order)
    }

    /// Records a negative delivery outcome with its reason.
    #[tracing::instrument(skip(self, reason))]
    pub async fn record_delivery_outcome(
        &self,
        order_id: OrderId,
        outcome: DeliveryOutcome,
        reason: OutcomeReason,
    ) -> Result<Order> {
        let order = self
            .mutate(order_id, |order, now| {
                order.negative_delivery_outcome(outcome, reason.clone(), now)
            })
            .await?;
        metrics::counter!("delivery_outcomes_total", "outcome" => outcome.as_str()).increment(1);
        Ok(order)
    }

    /// Re-dispatches after a negative outcome, optionally to a new agent.
    #[tracing::instrument(skip(self))]
    pub async fn redispatch_order(
        &self,
        order_id: OrderId,
        agent: Option<AgentId>,
    ) -> Result<Order> {
        self.mutate(order_id, |order, now| order.redispatch(agent, now))
            .await
    }

    /// Cancels an order pre-dispatch and releases any held stock.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        reason: Option<OutcomeReason>,
    ) -> Result<Order> {
        let mut release = false;
        let order = self
            .mutate(order_id, |order, now| {
                release = order.cancel(reason.clone(), now)?;
                Ok(())
            })
            .await?;

        if release {
            self.stock.release(order.id()).await?;
        }
        metrics::counter!("orders_cancelled_total", "cause" => "requested").increment(1);
        Ok(order)
    }

    /// Opens a return request on a delivered order.
    #[tracing::instrument(skip(self, reason))]
    pub async fn init_return(&self, order_id: OrderId, reason: String) -> Result<Order> {
        self.mutate(order_id, |order, now| {
            order.init_return(reason.clone(), now)
        })
        .await
    }

    /// Advances the return request on an order.
    #[tracing::instrument(skip(self))]
    pub async fn update_return(&self, order_id: OrderId, to: ReturnStatus) -> Result<Order> {
        self.mutate(order_id, |order, now| order.update_return(to, now))
            .await
    }

    /// Opens a refund record against an order. With no explicit amount,
    /// the order's grand total is refunded. A settled payment moves to
    /// REFUND_PENDING; an unsettled one is left alone.
    #[tracing::instrument(skip(self, notes))]
    pub async fn issue_refund(
        &self,
        order_id: OrderId,
        amount: Option<Money>,
        notes: Option<String>,
    ) -> Result<RefundRecord> {
        let order = self.load(order_id).await?;
        let amount = amount.unwrap_or(order.totals().grand_total);

        let refund = RefundRecord::new(order_id, order.payment().method, amount, notes, Utc::now());
        self.refunds.append(&refund).await?;

        self.mutate(order_id, |order, now| order.begin_refund(now).map(|_| ()))
            .await?;

        metrics::counter!("refunds_opened_total").increment(1);
        Ok(refund)
    }

    /// Advances a refund record. Completing the payout also settles the
    /// order's payment status to REFUNDED.
    #[tracing::instrument(skip(self))]
    pub async fn update_refund(
        &self,
        refund_id: RefundId,
        to: RefundStatus,
    ) -> Result<RefundRecord> {
        let mut refund = self.refunds.get(refund_id).await?;
        refund.advance(to, Utc::now())?;
        self.refunds.update(&refund).await?;

        if to == RefundStatus::Processed {
            self.mutate(refund.order_id, |order, now| {
                order.complete_refund(now).map(|_| ())
            })
            .await?;
        }
        Ok(refund)
    }

    /// Administratively deletes an order. Only legal strictly
    /// pre-dispatch; held stock is released.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<()> {
        let order = self.load(order_id).await?;
        if !order.is_deletable() {
            return Err(OrderError::NotDispatchable {
                delivery_state: order.delivery_state(),
            }
            .into());
        }

        self.orders.delete(order_id).await?;
        if order.stock_reserved() {
            self.stock.release(order_id).await?;
        }
        Ok(())
    }

    /// Expires unverified BANK payments placed before `cutoff`: payment
    /// fails, the order is cancelled, and held stock is released. Each
    /// order is handled independently; one failure does not stop the
    /// sweep. Returns the number of orders expired.
    #[tracing::instrument(skip(self))]
    pub async fn expire_unverified_bank_payments(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let stale = self.orders.find_unverified_bank_orders(cutoff).await?;
        let mut expired = 0;

        for candidate in stale {
            let order_id = candidate.id();
            let mut release = false;
            let result = self
                .mutate(order_id, |order, now| {
                    release = order.expire_bank_payment(now)?;
                    Ok(())
                })
                .await;

            match result {
                Ok(_) => {
                    if release {
                        self.release_quietly(order_id).await;
                    }
                    expired += 1;
                    metrics::counter!("bank_payments_expired_total").increment(1);
                    tracing::info!(%order_id, "bank payment expired");
                }
                // The order moved on (slip verified, cancelled) between
                // the scan and the write.
                Err(ServiceError::Rejected(err)) => {
                    tracing::debug!(%order_id, reason = err.reason_code(), "sweep skipped order");
                }
                Err(err) => {
                    tracing::warn!(%order_id, error = %err, "sweep failed for order");
                }
            }
        }

        Ok(expired)
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.load(order_id).await
    }

    /// All orders for a customer, newest first.
    pub async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        Ok(self.orders.list_for_customer(customer_id).await?)
    }

    /// The most recent `limit` status history entries for an order.
    pub async fn order_history(&self, order_id: OrderId, limit: usize) -> Result<Vec<StatusEntry>> {
        let order = self.load(order_id).await?;
        Ok(order.recent_history(limit).to_vec())
    }

    /// All refund records for an order.
    pub async fn refunds_for_order(&self, order_id: OrderId) -> Result<Vec<RefundRecord>> {
        Ok(self.refunds.list_for_order(order_id).await?)
    }

    /// Sets the available quantity for a product.
    pub async fn set_stock(&self, product_id: &ProductId, quantity: u32) -> Result<()> {
        Ok(self.stock.set_available(product_id, quantity).await?)
    }

    /// Current available quantity for a product.
    pub async fn stock_level(&self, product_id: &ProductId) -> Result<u32> {
        Ok(self.stock.available(product_id).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        Ok(self.orders.get(order_id).await?)
    }

    /// Load-apply-persist with bounded re-derivation on version conflicts.
    ///
    /// The closure runs against a freshly loaded aggregate on every
    /// attempt, so a lost race re-checks the guards instead of writing a
    /// decision made against stale state.
    async fn mutate<F>(&self, order_id: OrderId, mut apply: F) -> Result<Order>
    where
        F: FnMut(&mut Order, DateTime<Utc>) -> std::result::Result<(), OrderError>,
    {
        let mut attempts = 0;
        loop {
            let mut order = self.load(order_id).await?;
            apply(&mut order, Utc::now()).inspect_err(|err| {
                metrics::counter!("transitions_rejected_total", "reason" => err.reason_code())
                    .increment(1);
            })?;

            if self.persist(&mut order, &mut attempts).await? {
                return Ok(order);
            }
        }
    }

    /// Persists `order`, returning false when the caller should reload
    /// and retry after a version conflict.
    async fn persist(&self, order: &mut Order, attempts: &mut u32) -> Result<bool> {
        match self.orders.update(order).await {
            Ok(version) => {
                order.set_version(version);
                Ok(true)
            }
            Err(StoreError::VersionConflict { .. }) if *attempts < MAX_RETRIES => {
                *attempts += 1;
                metrics::counter!("order_write_conflicts_total").increment(1);
                Ok(false)
            }
            Err(StoreError::VersionConflict { .. }) => Err(ServiceError::Contention(order.id())),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort stock release on a compensation path; the release is
    /// idempotent, so a later retry can finish the job.
    async fn release_quietly(&self, order_id: OrderId) {
        if let Err(err) = self.stock.release(order_id).await {
            tracing::warn!(%order_id, error = %err, "failed to release stock");
        }
    }
}
