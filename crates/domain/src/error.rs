//! Typed rejection reasons for refused intents.

use thiserror::Error;

use crate::returns::{RefundStatus, ReturnStatus};
use crate::state::{DeliveryState, OrderState, PaymentMethod, PaymentStatus};

/// Why an intent against an order was rejected.
///
/// Every variant maps to a stable reason code (see [`OrderError::reason_code`])
/// so callers and tests can discriminate causes instead of pattern-matching
/// on message strings.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Cancellation (or administrative delete) requested after dispatch.
    #[error("order cannot be cancelled: delivery state is {delivery_state}")]
    NotDispatchable { delivery_state: DeliveryState },

    /// A fulfillment action was requested before payment settled.
    #[error("payment not confirmed: status is {status}")]
    PaymentNotConfirmed { status: PaymentStatus },

    /// The order is in a terminal state and cannot take this intent.
    #[error("order is in terminal state {state}")]
    TerminalState { state: OrderState },

    /// Delivery evidence was absent (no OTP, photo, or signature).
    #[error("delivery evidence missing: provide an OTP, POD photo, or signature")]
    EvidenceMissing,

    /// Delivery evidence was present but malformed.
    #[error("delivery evidence invalid: {reason}")]
    EvidenceInvalid { reason: &'static str },

    /// A negative delivery outcome was reported without a reason.
    #[error("reason required: provide a reason code or detail")]
    ReasonMissing,

    /// A return was initialized while another is still active.
    #[error("an active return request already exists (status {status})")]
    ReturnConflict { status: ReturnStatus },

    /// A return was initialized on an order that was never delivered.
    #[error("order is not delivered: state is {state}")]
    NotDelivered { state: OrderState },

    /// A return update was requested but no return request exists.
    #[error("no return request exists for this order")]
    ReturnNotFound,

    /// The requested return status is not a legal successor.
    #[error("illegal return transition from {from} to {to}")]
    IllegalReturnTransition { from: ReturnStatus, to: ReturnStatus },

    /// The requested refund status is not a legal successor.
    #[error("illegal refund transition from {from} to {to}")]
    IllegalRefundTransition { from: RefundStatus, to: RefundStatus },

    /// Dispatch requested without a delivery agent.
    #[error("a delivery agent is required for dispatch")]
    AgentRequired,

    /// The intent is not legal given the current order/delivery axes.
    #[error("cannot {action}: order state {order_state}, delivery state {delivery_state}")]
    IllegalTransition {
        action: &'static str,
        order_state: OrderState,
        delivery_state: DeliveryState,
    },

    /// The payment status change violates the method's legal set.
    #[error("illegal {method} payment transition from {from} to {to}")]
    IllegalPaymentTransition {
        method: PaymentMethod,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// A bank transfer was marked paid without slip verification.
    #[error("bank transfer has no verified slip")]
    BankSlipUnverified,

    /// Order placed with no lines.
    #[error("order has no lines")]
    EmptyOrder,

    /// Order line with a zero quantity.
    #[error("invalid quantity {quantity} for product {product}")]
    InvalidQuantity { product: String, quantity: u32 },

    /// Order line with a negative unit price. Zero is allowed: promo
    /// and goodwill items ship free.
    #[error("invalid unit price {price} for product {product}")]
    InvalidPrice { product: String, price: i64 },
}

impl OrderError {
    /// Stable, machine-readable reason code for this rejection.
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrderError::NotDispatchable { .. } => "NOT_DISPATCHABLE",
            OrderError::PaymentNotConfirmed { .. } => "PAYMENT_NOT_CONFIRMED",
            OrderError::TerminalState { .. } => "TERMINAL_STATE",
            OrderError::EvidenceMissing => "EVIDENCE_MISSING",
            OrderError::EvidenceInvalid { .. } => "EVIDENCE_INVALID",
            OrderError::ReasonMissing => "REASON_MISSING",
            OrderError::ReturnConflict { .. } => "RETURN_CONFLICT",
            OrderError::NotDelivered { .. } => "NOT_DELIVERED",
            OrderError::ReturnNotFound => "RETURN_NOT_FOUND",
            OrderError::IllegalReturnTransition { .. } => "ILLEGAL_RETURN_TRANSITION",
            OrderError::IllegalRefundTransition { .. } => "ILLEGAL_REFUND_TRANSITION",
            OrderError::AgentRequired => "AGENT_REQUIRED",
            OrderError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            OrderError::IllegalPaymentTransition { .. } => "ILLEGAL_PAYMENT_TRANSITION",
            OrderError::BankSlipUnverified => "BANK_SLIP_UNVERIFIED",
            OrderError::EmptyOrder => "EMPTY_ORDER",
            OrderError::InvalidQuantity { .. } => "INVALID_QUANTITY",
            OrderError::InvalidPrice { .. } => "INVALID_PRICE",
        }
    }

    /// Returns true for rejections the client can fix by changing the
    /// request (as opposed to state conflicts).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderError::EvidenceMissing
                | OrderError::EvidenceInvalid { .. }
                | OrderError::ReasonMissing
                | OrderError::AgentRequired
                | OrderError::EmptyOrder
                | OrderError::InvalidQuantity { .. }
                | OrderError::InvalidPrice { .. }
        )
    }
}
