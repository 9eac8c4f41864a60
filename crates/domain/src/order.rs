//! The order aggregate: three coupled state axes behind one transition API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::{OrderId, Version};

use crate::error::OrderError;
use crate::evidence::{DeliveryEvidence, OutcomeReason};
use crate::payment::{GatewayOutcome, Payment};
use crate::returns::{ReturnRequest, ReturnStatus};
use crate::state::{
    DeliveryOutcome, DeliveryState, OrderState, OrderStatus, PaymentMethod, PaymentStatus,
};
use crate::value_objects::{AddressSnapshot, AgentId, CustomerId, Money, OrderLine, OrderTotals};

/// One entry in the append-only status history. Entries record the legacy
/// status projection at the moment a transition applied; prior entries are
/// never mutated or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

/// Delivery bookkeeping: reason codes per negative transition, the
/// accepted proof-of-delivery evidence, and the attempt count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeliveryMeta {
    #[serde(default)]
    pub reasons: BTreeMap<String, OutcomeReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<DeliveryEvidence>,
    #[serde(default)]
    pub attempts: u32,
}

/// Result of applying a payment status change to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentChange {
    /// False when the write was a duplicate (idempotent no-op).
    pub changed: bool,
    /// True when a deferred reservation must now be taken (CARD payment
    /// confirmed and stock not yet held).
    pub reserve_stock: bool,
}

impl PaymentChange {
    fn noop() -> Self {
        Self {
            changed: false,
            reserve_stock: false,
        }
    }
}

/// The order aggregate root.
///
/// All mutation goes through the intent methods below; each one validates
/// its guards first and either fully applies or returns a typed rejection
/// with no partial write. Order lines are immutable snapshots taken at
/// placement time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    lines: Vec<OrderLine>,
    address: AddressSnapshot,
    totals: OrderTotals,
    order_state: OrderState,
    delivery_state: DeliveryState,
    payment: Payment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assigned_agent: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_request: Option<ReturnRequest>,
    status_history: Vec<StatusEntry>,
    #[serde(default)]
    delivery_meta: DeliveryMeta,
    #[serde(default)]
    stock_reserved: bool,
    #[serde(default)]
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn address(&self) -> &AddressSnapshot {
        &self.address
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn order_state(&self) -> OrderState {
        self.order_state
    }

    pub fn delivery_state(&self) -> DeliveryState {
        self.delivery_state
    }

    pub fn payment(&self) -> &Payment {
        &self.payment
    }

    pub fn assigned_agent(&self) -> Option<AgentId> {
        self.assigned_agent
    }

    pub fn return_request(&self) -> Option<&ReturnRequest> {
        self.return_request.as_ref()
    }

    pub fn delivery_meta(&self) -> &DeliveryMeta {
        &self.delivery_meta
    }

    pub fn stock_reserved(&self) -> bool {
        self.stock_reserved
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.order_state.is_terminal()
    }

    /// The legacy single-field status, projected from the three axes at
    /// read time. Never stored, never writable.
    pub fn status(&self) -> OrderStatus {
        OrderStatus::project(self.order_state, self.delivery_state, self.payment.status)
    }

    /// Full append-only status history, oldest first.
    pub fn status_history(&self) -> &[StatusEntry] {
        &self.status_history
    }

    /// The most recent `limit` history entries, oldest first.
    pub fn recent_history(&self, limit: usize) -> &[StatusEntry] {
        let start = self.status_history.len().saturating_sub(limit);
        &self.status_history[start..]
    }

    /// True while administrative delete is still permitted.
    pub fn is_deletable(&self) -> bool {
        self.delivery_state == DeliveryState::NotDispatched
    }
}

// Intent methods
impl Order {
    /// Places a new order. CARD orders wait for the gateway; COD and BANK
    /// are confirmed immediately (the caller reserves their stock in the
    /// same unit of work and then flags it with [`Order::mark_stock_reserved`]).
    pub fn place(
        id: OrderId,
        customer_id: CustomerId,
        lines: Vec<OrderLine>,
        address: AddressSnapshot,
        shipping: Money,
        discount: Money,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }
        for line in &lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product: line.product_id.to_string(),
                    quantity: line.quantity,
                });
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product: line.product_id.to_string(),
                    price: line.unit_price.cents(),
                });
            }
        }

        let totals = OrderTotals::compute(&lines, shipping, discount);
        let order_state = if method == PaymentMethod::Card {
            OrderState::AwaitingPayment
        } else {
            OrderState::Confirmed
        };

        let mut order = Self {
            id,
            customer_id,
            lines,
            address,
            totals,
            order_state,
            delivery_state: DeliveryState::NotDispatched,
            payment: Payment::new(method),
            assigned_agent: None,
            return_request: None,
            status_history: Vec::new(),
            delivery_meta: DeliveryMeta::default(),
            stock_reserved: false,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        };
        order.push_history(now);
        Ok(order)
    }

    /// Records that stock is physically held for this order.
    pub fn mark_stock_reserved(&mut self) {
        self.stock_reserved = true;
    }

    /// Applies a payment gateway callback (CARD orders only).
    ///
    /// Idempotent: a duplicate callback is a no-op, so retried webhooks
    /// cannot double-reserve stock or double-append history.
    pub fn apply_gateway_callback(
        &mut self,
        outcome: GatewayOutcome,
        gateway_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<PaymentChange, OrderError> {
        if self.payment.method != PaymentMethod::Card {
            return Err(OrderError::IllegalPaymentTransition {
                method: self.payment.method,
                from: self.payment.status,
                to: outcome.status(),
            });
        }
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }

        let changed = self.payment.set_status(outcome.status())?;
        if !changed {
            return Ok(PaymentChange::noop());
        }

        if let Some(reference) = gateway_ref {
            self.payment.gateway_ref = Some(reference);
        }

        let mut reserve_stock = false;
        if outcome == GatewayOutcome::Paid && self.order_state == OrderState::AwaitingPayment {
            self.order_state = OrderState::Confirmed;
            reserve_stock = !self.stock_reserved;
        }
        self.push_history(now);

        Ok(PaymentChange {
            changed: true,
            reserve_stock,
        })
    }

    /// Verifies a bank-transfer slip and settles the payment. Idempotent.
    pub fn verify_bank_slip(
        &mut self,
        slip_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        let changed = self.payment.verify_bank_slip(slip_ref, now)?;
        if changed {
            self.push_history(now);
        }
        Ok(changed)
    }

    /// Expires an unverified bank-transfer payment past the verification
    /// deadline: payment fails and the order is cancelled, releasing any
    /// held stock. Used only by the background sweep, through the same
    /// guard path as interactive cancellation.
    pub fn expire_bank_payment(&mut self, now: DateTime<Utc>) -> Result<bool, OrderError> {
        if self.payment.method != PaymentMethod::Bank
            || self.payment.status != PaymentStatus::Pending
        {
            return Err(OrderError::IllegalPaymentTransition {
                method: self.payment.method,
                from: self.payment.status,
                to: PaymentStatus::Failed,
            });
        }
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if self.delivery_state != DeliveryState::NotDispatched {
            return Err(OrderError::NotDispatchable {
                delivery_state: self.delivery_state,
            });
        }

        self.payment.set_status(PaymentStatus::Failed)?;
        self.order_state = OrderState::Cancelled;
        self.delivery_meta.reasons.insert(
            "cancelled".to_string(),
            OutcomeReason::from_code("BANK_VERIFICATION_EXPIRED"),
        );
        let release_stock = self.stock_reserved;
        self.stock_reserved = false;
        self.push_history(now);
        Ok(release_stock)
    }

    /// Starts packing. Requires a confirmed order whose payment allows
    /// fulfillment.
    pub fn pack(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if !self.payment.allows_fulfillment() {
            return Err(OrderError::PaymentNotConfirmed {
                status: self.payment.status,
            });
        }
        if !self.order_state.can_pack() {
            return Err(self.illegal("pack"));
        }

        self.order_state = OrderState::Packing;
        self.push_history(now);
        Ok(())
    }

    /// Hands the order to a delivery agent.
    pub fn dispatch(&mut self, agent: AgentId, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if !self.payment.allows_fulfillment() {
            if self.payment.method == PaymentMethod::Bank
                && self.payment.status == PaymentStatus::Pending
            {
                return Err(OrderError::BankSlipUnverified);
            }
            return Err(OrderError::PaymentNotConfirmed {
                status: self.payment.status,
            });
        }
        if !self.order_state.can_dispatch() || self.delivery_state != DeliveryState::NotDispatched {
            return Err(self.illegal("dispatch"));
        }

        self.order_state = OrderState::Shipped;
        self.delivery_state = DeliveryState::Dispatched;
        self.assigned_agent = Some(agent);
        self.push_history(now);
        Ok(())
    }

    /// The agent starts the delivery run.
    pub fn start_delivery_run(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if self.order_state != OrderState::Shipped
            || self.delivery_state != DeliveryState::Dispatched
        {
            return Err(self.illegal("start delivery run"));
        }

        self.order_state = OrderState::OutForDelivery;
        self.push_history(now);
        Ok(())
    }

    /// Closes the delivery with proof-of-delivery evidence. Validation
    /// runs before any mutation; rejected evidence has zero side effects.
    /// COD payment is collected at handover.
    pub fn deliver(
        &mut self,
        evidence: DeliveryEvidence,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if self.delivery_state != DeliveryState::Dispatched {
            return Err(self.illegal("deliver"));
        }
        evidence.validate()?;

        if self.payment.method == PaymentMethod::Cod {
            self.payment.set_status(PaymentStatus::Paid)?;
        }
        self.order_state = OrderState::Delivered;
        self.delivery_state = DeliveryState::Delivered;
        self.delivery_meta.evidence = Some(evidence);
        self.push_history(now);
        Ok(())
    }

    /// Records a negative delivery outcome. The outcome is not terminal;
    /// the order can be re-dispatched.
    pub fn negative_delivery_outcome(
        &mut self,
        outcome: DeliveryOutcome,
        reason: OutcomeReason,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if self.delivery_state != DeliveryState::Dispatched {
            return Err(self.illegal("record delivery outcome"));
        }
        reason.validate()?;

        self.delivery_state = outcome.delivery_state();
        self.delivery_meta.attempts += 1;
        self.delivery_meta
            .reasons
            .insert(outcome.as_str().to_string(), reason);
        // A run that ended badly puts the parcel back with the carrier.
        if self.order_state == OrderState::OutForDelivery {
            self.order_state = OrderState::Shipped;
        }
        self.push_history(now);
        Ok(())
    }

    /// Re-dispatches after a negative outcome, optionally to a new agent.
    pub fn redispatch(
        &mut self,
        agent: Option<AgentId>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if !self.delivery_state.is_negative_outcome() {
            return Err(self.illegal("redispatch"));
        }

        self.delivery_state = DeliveryState::Dispatched;
        if let Some(agent) = agent {
            self.assigned_agent = Some(agent);
        }
        self.push_history(now);
        Ok(())
    }

    /// Cancels the order. Only legal strictly pre-dispatch. Returns true
    /// when the caller must release previously reserved stock.
    pub fn cancel(
        &mut self,
        reason: Option<OutcomeReason>,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if self.is_terminal() {
            return Err(OrderError::TerminalState {
                state: self.order_state,
            });
        }
        if self.delivery_state != DeliveryState::NotDispatched {
            return Err(OrderError::NotDispatchable {
                delivery_state: self.delivery_state,
            });
        }

        if self.payment.status == PaymentStatus::Paid {
            // Money already captured; the refund ledger takes over.
            self.payment.set_status(PaymentStatus::RefundPending)?;
        }
        self.order_state = OrderState::Cancelled;
        if let Some(reason) = reason {
            self.delivery_meta
                .reasons
                .insert("cancelled".to_string(), reason);
        }
        let release_stock = self.stock_reserved;
        self.stock_reserved = false;
        self.push_history(now);
        Ok(release_stock)
    }

    /// Initializes a return request on a delivered order.
    pub fn init_return(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if self.order_state != OrderState::Delivered {
            return Err(OrderError::NotDelivered {
                state: self.order_state,
            });
        }
        if let Some(existing) = &self.return_request
            && existing.status.is_active()
        {
            return Err(OrderError::ReturnConflict {
                status: existing.status,
            });
        }

        self.return_request = Some(ReturnRequest::new(reason, now));
        self.updated_at = now;
        Ok(())
    }

    /// Advances the return request. The order becomes RETURNED once the
    /// goods are received back.
    pub fn update_return(
        &mut self,
        to: ReturnStatus,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let request = self.return_request.as_mut().ok_or(OrderError::ReturnNotFound)?;
        request.advance(to, now)?;

        if to == ReturnStatus::Received && self.order_state != OrderState::Returned {
            self.order_state = OrderState::Returned;
            self.push_history(now);
        } else {
            self.updated_at = now;
        }
        Ok(())
    }

    /// Moves a settled payment into the refund flow. No-op when the
    /// payment never settled (e.g., a refund record for a COD order that
    /// was cancelled before collection).
    pub fn begin_refund(&mut self, now: DateTime<Utc>) -> Result<bool, OrderError> {
        if self.payment.status != PaymentStatus::Paid {
            return Ok(false);
        }
        self.payment.set_status(PaymentStatus::RefundPending)?;
        self.updated_at = now;
        Ok(true)
    }

    /// Marks the refund payout complete.
    pub fn complete_refund(&mut self, now: DateTime<Utc>) -> Result<bool, OrderError> {
        if self.payment.status != PaymentStatus::RefundPending {
            return Ok(false);
        }
        self.payment.set_status(PaymentStatus::Refunded)?;
        self.updated_at = now;
        Ok(true)
    }

    fn illegal(&self, action: &'static str) -> OrderError {
        OrderError::IllegalTransition {
            action,
            order_state: self.order_state,
            delivery_state: self.delivery_state,
        }
    }

    fn push_history(&mut self, now: DateTime<Utc>) {
        self.status_history.push(StatusEntry {
            status: self.status(),
            at: now,
        });
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::is_reachable;

    fn lines() -> Vec<OrderLine> {
        vec![OrderLine::new(
            "SKU-001",
            "widget",
            "Widget",
            Money::from_cents(1000),
            2,
        )]
    }

    fn place(method: PaymentMethod) -> Order {
        Order::place(
            OrderId::new(),
            CustomerId::new(),
            lines(),
            AddressSnapshot::default(),
            Money::zero(),
            Money::zero(),
            method,
            Utc::now(),
        )
        .unwrap()
    }

    fn assert_coherent(order: &Order) {
        assert!(
            is_reachable(
                order.order_state(),
                order.delivery_state(),
                order.payment().status,
                order.payment().method,
            ),
            "incoherent axes: {:?}/{:?}/{:?}",
            order.order_state(),
            order.delivery_state(),
            order.payment().status,
        );
    }

    fn delivered_cod_order() -> Order {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        order
            .deliver(
                DeliveryEvidence {
                    otp: Some("4821".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        order
    }

    #[test]
    fn place_cod_confirms_immediately() {
        let order = place(PaymentMethod::Cod);
        assert_eq!(order.order_state(), OrderState::Confirmed);
        assert_eq!(order.delivery_state(), DeliveryState::NotDispatched);
        assert_eq!(order.payment().status, PaymentStatus::Pending);
        assert_eq!(order.status_history().len(), 1);
        assert_coherent(&order);
    }

    #[test]
    fn place_card_awaits_payment() {
        let order = place(PaymentMethod::Card);
        assert_eq!(order.order_state(), OrderState::AwaitingPayment);
        assert_coherent(&order);
    }

    #[test]
    fn place_rejects_empty_order() {
        let result = Order::place(
            OrderId::new(),
            CustomerId::new(),
            vec![],
            AddressSnapshot::default(),
            Money::zero(),
            Money::zero(),
            PaymentMethod::Cod,
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::EmptyOrder)));
    }

    #[test]
    fn place_rejects_zero_quantity() {
        let result = Order::place(
            OrderId::new(),
            CustomerId::new(),
            vec![OrderLine::new(
                "SKU-001",
                "widget",
                "Widget",
                Money::from_cents(1000),
                0,
            )],
            AddressSnapshot::default(),
            Money::zero(),
            Money::zero(),
            PaymentMethod::Cod,
            Utc::now(),
        );
        assert!(matches!(result, Err(OrderError::InvalidQuantity { .. })));
    }

    #[test]
    fn gateway_paid_confirms_and_requests_reservation() {
        let mut order = place(PaymentMethod::Card);
        let change = order
            .apply_gateway_callback(GatewayOutcome::Paid, Some("TXN-1".into()), Utc::now())
            .unwrap();

        assert!(change.changed);
        assert!(change.reserve_stock);
        assert_eq!(order.order_state(), OrderState::Confirmed);
        assert_eq!(order.payment().status, PaymentStatus::Paid);
        assert_eq!(order.payment().gateway_ref.as_deref(), Some("TXN-1"));
        assert_coherent(&order);
    }

    #[test]
    fn duplicate_gateway_callback_is_noop() {
        let mut order = place(PaymentMethod::Card);
        order
            .apply_gateway_callback(GatewayOutcome::Paid, None, Utc::now())
            .unwrap();
        let history_len = order.status_history().len();

        let change = order
            .apply_gateway_callback(GatewayOutcome::Paid, None, Utc::now())
            .unwrap();

        assert!(!change.changed);
        assert!(!change.reserve_stock);
        assert_eq!(order.status_history().len(), history_len);
    }

    #[test]
    fn gateway_callback_rejected_for_cod() {
        let mut order = place(PaymentMethod::Cod);
        let err = order
            .apply_gateway_callback(GatewayOutcome::Paid, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::IllegalPaymentTransition { .. }));
    }

    #[test]
    fn pack_requires_payment() {
        let mut order = place(PaymentMethod::Card);
        let err = order.pack(Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "PAYMENT_NOT_CONFIRMED");

        order
            .apply_gateway_callback(GatewayOutcome::Paid, None, Utc::now())
            .unwrap();
        order.mark_stock_reserved();
        order.pack(Utc::now()).unwrap();
        assert_eq!(order.order_state(), OrderState::Packing);
        assert_coherent(&order);
    }

    #[test]
    fn cod_can_pack_unpaid() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.pack(Utc::now()).unwrap();
        assert_coherent(&order);
    }

    #[test]
    fn bank_order_fulfills_only_after_verification() {
        let mut order = place(PaymentMethod::Bank);
        order.mark_stock_reserved();

        // Nothing moves while the slip is unverified.
        let err = order.pack(Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::PaymentNotConfirmed { .. }));
        assert_eq!(order.order_state(), OrderState::Confirmed);

        let err = order.dispatch(AgentId::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::BankSlipUnverified));

        assert!(order.verify_bank_slip("SLIP-42", Utc::now()).unwrap());
        assert_eq!(order.payment().status, PaymentStatus::Paid);
        // Re-verification is a no-op.
        assert!(!order.verify_bank_slip("SLIP-42", Utc::now()).unwrap());

        order.pack(Utc::now()).unwrap();
        assert_coherent(&order);
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        assert_coherent(&order);
    }

    #[test]
    fn expire_bank_payment_cancels_and_releases() {
        let mut order = place(PaymentMethod::Bank);
        order.mark_stock_reserved();

        let release = order.expire_bank_payment(Utc::now()).unwrap();
        assert!(release);
        assert_eq!(order.order_state(), OrderState::Cancelled);
        assert_eq!(order.payment().status, PaymentStatus::Failed);
        assert!(!order.stock_reserved());
        assert_coherent(&order);

        // A verified order is no longer expirable.
        let mut paid = place(PaymentMethod::Bank);
        paid.verify_bank_slip("SLIP-1", Utc::now()).unwrap();
        let err = paid.expire_bank_payment(Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::IllegalPaymentTransition { .. }));
    }

    #[test]
    fn dispatch_from_confirmed_or_packing() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        let agent = AgentId::new();
        order.dispatch(agent, Utc::now()).unwrap();

        assert_eq!(order.order_state(), OrderState::Shipped);
        assert_eq!(order.delivery_state(), DeliveryState::Dispatched);
        assert_eq!(order.assigned_agent(), Some(agent));
        assert_coherent(&order);

        // Already dispatched.
        let err = order.dispatch(AgentId::new(), Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "ILLEGAL_TRANSITION");
    }

    #[test]
    fn deliver_rejects_empty_evidence_with_no_side_effects() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        let before_history = order.status_history().len();

        let err = order
            .deliver(DeliveryEvidence::default(), Utc::now())
            .unwrap_err();

        assert_eq!(err.reason_code(), "EVIDENCE_MISSING");
        assert_eq!(order.order_state(), OrderState::Shipped);
        assert_eq!(order.delivery_state(), DeliveryState::Dispatched);
        assert_eq!(order.payment().status, PaymentStatus::Pending);
        assert_eq!(order.status_history().len(), before_history);
    }

    #[test]
    fn deliver_with_otp_settles_cod() {
        let order = delivered_cod_order();
        assert_eq!(order.order_state(), OrderState::Delivered);
        assert_eq!(order.delivery_state(), DeliveryState::Delivered);
        assert_eq!(order.payment().status, PaymentStatus::Paid);
        assert!(order.is_terminal());
        assert_coherent(&order);
    }

    #[test]
    fn deliver_requires_dispatched() {
        let mut order = place(PaymentMethod::Cod);
        let err = order
            .deliver(
                DeliveryEvidence {
                    otp: Some("4821".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "ILLEGAL_TRANSITION");
    }

    #[test]
    fn out_for_delivery_roundtrip() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        order.start_delivery_run(Utc::now()).unwrap();
        assert_eq!(order.order_state(), OrderState::OutForDelivery);
        assert_coherent(&order);

        order
            .negative_delivery_outcome(
                DeliveryOutcome::Attempted,
                OutcomeReason::from_code("NO_ANSWER"),
                Utc::now(),
            )
            .unwrap();
        // The failed run puts the order back to Shipped.
        assert_eq!(order.order_state(), OrderState::Shipped);
        assert_eq!(order.delivery_state(), DeliveryState::Attempted);
        assert_eq!(order.delivery_meta().attempts, 1);
        assert_coherent(&order);

        order.redispatch(None, Utc::now()).unwrap();
        assert_eq!(order.delivery_state(), DeliveryState::Dispatched);
        assert_coherent(&order);
    }

    #[test]
    fn negative_outcome_requires_reason() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();

        let err = order
            .negative_delivery_outcome(
                DeliveryOutcome::Failed,
                OutcomeReason::default(),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err.reason_code(), "REASON_MISSING");
        assert_eq!(order.delivery_state(), DeliveryState::Dispatched);
    }

    #[test]
    fn cancel_pre_dispatch_releases_stock() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();

        let release = order.cancel(None, Utc::now()).unwrap();
        assert!(release);
        assert_eq!(order.order_state(), OrderState::Cancelled);
        assert!(!order.stock_reserved());
        assert_coherent(&order);
    }

    #[test]
    fn cancel_after_dispatch_is_rejected() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        let before = order.status_history().len();

        let err = order.cancel(None, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "NOT_DISPATCHABLE");
        assert_eq!(order.order_state(), OrderState::Shipped);
        assert_eq!(order.status_history().len(), before);
    }

    #[test]
    fn cancel_paid_order_moves_payment_to_refund_pending() {
        let mut order = place(PaymentMethod::Card);
        order
            .apply_gateway_callback(GatewayOutcome::Paid, None, Utc::now())
            .unwrap();
        order.mark_stock_reserved();

        order.cancel(None, Utc::now()).unwrap();
        assert_eq!(order.payment().status, PaymentStatus::RefundPending);
        assert_coherent(&order);
    }

    #[test]
    fn cancel_delivered_order_is_terminal_state() {
        let mut order = delivered_cod_order();
        let err = order.cancel(None, Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "TERMINAL_STATE");
    }

    #[test]
    fn terminal_orders_reject_fulfillment_intents() {
        let mut order = place(PaymentMethod::Cod);
        order.cancel(None, Utc::now()).unwrap();

        assert_eq!(order.pack(Utc::now()).unwrap_err().reason_code(), "TERMINAL_STATE");
        assert_eq!(
            order
                .dispatch(AgentId::new(), Utc::now())
                .unwrap_err()
                .reason_code(),
            "TERMINAL_STATE"
        );
        assert_eq!(
            order
                .deliver(DeliveryEvidence::default(), Utc::now())
                .unwrap_err()
                .reason_code(),
            "TERMINAL_STATE"
        );
    }

    #[test]
    fn init_return_requires_delivered() {
        let mut order = place(PaymentMethod::Cod);
        let err = order.init_return("wrong size", Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "NOT_DELIVERED");
    }

    #[test]
    fn single_active_return() {
        let mut order = delivered_cod_order();
        order.init_return("wrong size", Utc::now()).unwrap();

        let err = order.init_return("changed my mind", Utc::now()).unwrap_err();
        assert_eq!(err.reason_code(), "RETURN_CONFLICT");
        // The existing request is untouched.
        assert_eq!(order.return_request().unwrap().reason, "wrong size");
    }

    #[test]
    fn rejected_return_allows_a_new_one() {
        let mut order = delivered_cod_order();
        order.init_return("wrong size", Utc::now()).unwrap();
        order
            .update_return(ReturnStatus::Rejected, Utc::now())
            .unwrap();

        order.init_return("still wrong size", Utc::now()).unwrap();
        assert_eq!(
            order.return_request().unwrap().status,
            ReturnStatus::Requested
        );
    }

    #[test]
    fn return_received_marks_order_returned() {
        let mut order = delivered_cod_order();
        order.init_return("wrong size", Utc::now()).unwrap();
        order
            .update_return(ReturnStatus::Approved, Utc::now())
            .unwrap();
        order
            .update_return(ReturnStatus::Received, Utc::now())
            .unwrap();

        assert_eq!(order.order_state(), OrderState::Returned);
        assert_coherent(&order);

        order.update_return(ReturnStatus::Closed, Utc::now()).unwrap();
        assert_eq!(order.order_state(), OrderState::Returned);
    }

    #[test]
    fn update_return_without_request_fails() {
        let mut order = delivered_cod_order();
        let err = order
            .update_return(ReturnStatus::Approved, Utc::now())
            .unwrap_err();
        assert_eq!(err.reason_code(), "RETURN_NOT_FOUND");
    }

    #[test]
    fn refund_flow_on_delivered_order() {
        let mut order = delivered_cod_order();
        assert!(order.begin_refund(Utc::now()).unwrap());
        assert_eq!(order.payment().status, PaymentStatus::RefundPending);
        assert!(order.complete_refund(Utc::now()).unwrap());
        assert_eq!(order.payment().status, PaymentStatus::Refunded);
        assert_coherent(&order);
    }

    #[test]
    fn begin_refund_noop_when_never_paid() {
        let mut order = place(PaymentMethod::Cod);
        order.cancel(None, Utc::now()).unwrap();
        assert!(!order.begin_refund(Utc::now()).unwrap());
        assert_eq!(order.payment().status, PaymentStatus::Pending);
    }

    #[test]
    fn history_is_append_only_and_bounded_retrieval_works() {
        let mut order = place(PaymentMethod::Cod);
        order.mark_stock_reserved();
        order.pack(Utc::now()).unwrap();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();

        assert_eq!(order.status_history().len(), 3);
        assert_eq!(order.status_history()[0].status, OrderStatus::Confirmed);

        let tail = order.recent_history(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].status, OrderStatus::Shipped);

        // Limit larger than history is fine.
        assert_eq!(order.recent_history(100).len(), 3);
    }

    #[test]
    fn serialization_roundtrip() {
        let order = delivered_cod_order();
        let json = serde_json::to_string(&order).unwrap();
        let deserialized: Order = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id(), order.id());
        assert_eq!(deserialized.order_state(), OrderState::Delivered);
        assert_eq!(deserialized.status_history().len(), order.status_history().len());
    }

    #[test]
    fn deletable_only_pre_dispatch() {
        let mut order = place(PaymentMethod::Cod);
        assert!(order.is_deletable());
        order.mark_stock_reserved();
        order.dispatch(AgentId::new(), Utc::now()).unwrap();
        assert!(!order.is_deletable());
    }
}
