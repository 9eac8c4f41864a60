//! The three coupled state axes of an order, and the legal combinations.

use serde::{Deserialize, Serialize};

/// The primary lifecycle state of an order.
///
/// State transitions (payment axis elided):
/// ```text
/// AwaitingPayment ──► Confirmed ──► Packing ──► Shipped ──► OutForDelivery ──► Delivered ──► Returned
///        │                │            │           │
///        └────────────────┴────────────┴──► Cancelled (pre-dispatch only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Waiting for the payment gateway (CARD orders only).
    #[default]
    AwaitingPayment,

    /// Payment settled or committed; ready for fulfillment.
    Confirmed,

    /// Being packed for dispatch.
    Packing,

    /// Handed to a delivery agent.
    Shipped,

    /// Agent has started the delivery run.
    OutForDelivery,

    /// Delivered with accepted evidence (terminal).
    Delivered,

    /// Cancelled before dispatch (terminal).
    Cancelled,

    /// Returned by the customer after delivery (terminal).
    Returned,
}

impl OrderState {
    /// Returns true if this is a terminal state. Terminal orders are
    /// immutable except for the return/refund sub-workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Delivered | OrderState::Cancelled | OrderState::Returned
        )
    }

    /// Returns true if packing may start from this state.
    pub fn can_pack(&self) -> bool {
        matches!(self, OrderState::Confirmed)
    }

    /// Returns true if the order may be handed to a delivery agent.
    pub fn can_dispatch(&self) -> bool {
        matches!(self, OrderState::Confirmed | OrderState::Packing)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::AwaitingPayment => "AWAITING_PAYMENT",
            OrderState::Confirmed => "CONFIRMED",
            OrderState::Packing => "PACKING",
            OrderState::Shipped => "SHIPPED",
            OrderState::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderState::Delivered => "DELIVERED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The physical delivery state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    /// Not yet handed to an agent. Cancellation is only legal here.
    #[default]
    NotDispatched,

    /// With a delivery agent.
    Dispatched,

    /// Handed over with accepted evidence (terminal).
    Delivered,

    /// A delivery attempt was made but the customer was unavailable.
    Attempted,

    /// Delivery failed (wrong address, refused, ...).
    Failed,

    /// An exception outside the normal flow (damaged parcel, ...).
    Exception,

    /// Being routed back to the sender.
    ReturnToSender,
}

impl DeliveryState {
    /// Returns true for the negative, re-dispatchable outcome states.
    pub fn is_negative_outcome(&self) -> bool {
        matches!(
            self,
            DeliveryState::Attempted
                | DeliveryState::Failed
                | DeliveryState::Exception
                | DeliveryState::ReturnToSender
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::NotDispatched => "NOT_DISPATCHED",
            DeliveryState::Dispatched => "DISPATCHED",
            DeliveryState::Delivered => "DELIVERED",
            DeliveryState::Attempted => "ATTEMPTED",
            DeliveryState::Failed => "FAILED",
            DeliveryState::Exception => "EXCEPTION",
            DeliveryState::ReturnToSender => "RETURN_TO_SENDER",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Pending,
    Authorized,
    Paid,
    Failed,
    RefundPending,
    Refunded,
}

impl PaymentStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::RefundPending => "REFUND_PENDING",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    /// Returns true once the money side is settled (including the refund
    /// states, which are only reachable from Paid).
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::RefundPending | PaymentStatus::Refunded
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an order is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Cash on delivery; collected at handover.
    Cod,
    /// Card via the payment gateway; the gateway callback drives status.
    Card,
    /// Bank transfer; settled only by manual slip verification.
    Bank,
}

impl PaymentMethod {
    /// Payment status assigned at order placement.
    pub fn initial_status(&self) -> PaymentStatus {
        // All three methods start an order at PENDING; UNPAID only exists
        // pre-order.
        PaymentStatus::Pending
    }

    /// Returns true if stock is reserved at placement time. CARD defers
    /// reservation until the gateway confirms, to avoid locking stock
    /// for an uncertain, possibly abandoned payment flow.
    pub fn reserves_at_placement(&self) -> bool {
        !matches!(self, PaymentMethod::Card)
    }

    /// Returns the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "COD",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Bank => "BANK",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Negative delivery outcome kinds, reachable only from `Dispatched`.
/// None of these is terminal; re-dispatch is permitted from all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Attempted,
    Failed,
    Exception,
    ReturnToSender,
}

impl DeliveryOutcome {
    /// The delivery state this outcome moves the order to.
    pub fn delivery_state(&self) -> DeliveryState {
        match self {
            DeliveryOutcome::Attempted => DeliveryState::Attempted,
            DeliveryOutcome::Failed => DeliveryState::Failed,
            DeliveryOutcome::Exception => DeliveryState::Exception,
            DeliveryOutcome::ReturnToSender => DeliveryState::ReturnToSender,
        }
    }

    /// Returns the outcome name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Attempted => "attempted",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Exception => "exception",
            DeliveryOutcome::ReturnToSender => "return_to_sender",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Legacy single-field order status, kept for backward-compatible
/// reporting. This is a pure projection computed from the three axes at
/// read time; it is never stored or written independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    PaymentFailed,
    Confirmed,
    Packing,
    Shipped,
    OutForDelivery,
    DeliveryException,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    /// Projects the legacy status from the three axes.
    pub fn project(
        order: OrderState,
        delivery: DeliveryState,
        payment: PaymentStatus,
    ) -> OrderStatus {
        match order {
            OrderState::AwaitingPayment => {
                if payment == PaymentStatus::Failed {
                    OrderStatus::PaymentFailed
                } else {
                    OrderStatus::AwaitingPayment
                }
            }
            OrderState::Confirmed => OrderStatus::Confirmed,
            OrderState::Packing => OrderStatus::Packing,
            OrderState::Shipped => {
                if delivery.is_negative_outcome() {
                    OrderStatus::DeliveryException
                } else {
                    OrderStatus::Shipped
                }
            }
            OrderState::OutForDelivery => OrderStatus::OutForDelivery,
            OrderState::Delivered => OrderStatus::Delivered,
            OrderState::Cancelled => OrderStatus::Cancelled,
            OrderState::Returned => OrderStatus::Returned,
        }
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Packing => "PACKING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::DeliveryException => "DELIVERY_EXCEPTION",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns true if `(order, delivery, payment)` is a combination the
/// transition graph can actually produce for the given payment method.
///
/// Every transition preserves membership in this set; tests assert it
/// after each intent.
pub fn is_reachable(
    order: OrderState,
    delivery: DeliveryState,
    payment: PaymentStatus,
    method: PaymentMethod,
) -> bool {
    use DeliveryState as D;
    use PaymentStatus as P;

    match order {
        OrderState::AwaitingPayment => {
            // Only CARD orders wait for payment.
            method == PaymentMethod::Card
                && delivery == D::NotDispatched
                && matches!(payment, P::Pending | P::Authorized | P::Failed)
        }
        OrderState::Confirmed => {
            delivery == D::NotDispatched
                && match method {
                    PaymentMethod::Cod => payment == P::Pending,
                    PaymentMethod::Card => payment == P::Paid,
                    // A BANK order sits Confirmed while the slip clears.
                    PaymentMethod::Bank => matches!(payment, P::Pending | P::Paid),
                }
        }
        OrderState::Packing => {
            // Packing requires payment settled or collection at the door.
            delivery == D::NotDispatched
                && match method {
                    PaymentMethod::Cod => payment == P::Pending,
                    PaymentMethod::Card | PaymentMethod::Bank => payment == P::Paid,
                }
        }
        OrderState::Shipped => {
            matches!(
                delivery,
                D::Dispatched | D::Attempted | D::Failed | D::Exception | D::ReturnToSender
            ) && (payment == P::Paid || (method == PaymentMethod::Cod && payment == P::Pending))
        }
        OrderState::OutForDelivery => {
            delivery == D::Dispatched
                && (payment == P::Paid || (method == PaymentMethod::Cod && payment == P::Pending))
        }
        OrderState::Delivered => {
            delivery == D::Delivered && matches!(payment, P::Paid | P::RefundPending | P::Refunded)
        }
        OrderState::Cancelled => {
            delivery == D::NotDispatched
                && matches!(
                    payment,
                    P::Unpaid | P::Pending | P::Authorized | P::Failed | P::RefundPending | P::Refunded
                )
        }
        OrderState::Returned => {
            delivery == D::Delivered && matches!(payment, P::Paid | P::RefundPending | P::Refunded)
        }
    }
}
