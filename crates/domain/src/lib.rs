//! Domain layer for the order lifecycle engine.
//!
//! This crate is pure state-machine logic with no IO:
//! - The `Order` aggregate with its three coupled state axes
//! - Payment sub-ledger rules per payment method
//! - Delivery evidence and reason-code validation
//! - Return and refund sub-state machines
//! - Typed rejection reasons for every refused intent

mod error;
mod evidence;
mod order;
mod payment;
mod returns;
mod state;
mod value_objects;

pub use error::OrderError;
pub use evidence::{DeliveryEvidence, OutcomeReason};
pub use order::{DeliveryMeta, Order, PaymentChange, StatusEntry};
pub use payment::{BankTransfer, GatewayOutcome, Payment};
pub use returns::{RefundId, RefundRecord, RefundStatus, ReturnRequest, ReturnStatus};
pub use state::{
    DeliveryOutcome, DeliveryState, OrderState, OrderStatus, PaymentMethod, PaymentStatus,
    is_reachable,
};
pub use value_objects::{
    AddressSnapshot, AgentId, CustomerId, Money, OrderLine, OrderTotals, ProductId,
};
