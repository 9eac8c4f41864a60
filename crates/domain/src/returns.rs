//! Return-request sub-state machine and the refund ledger record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::OrderId;

use crate::error::OrderError;
use crate::state::PaymentMethod;
use crate::value_objects::Money;

/// Status of a return request.
///
/// The machine is linear with one branch:
/// `Requested → Approved → Received → Closed`, or `Requested → Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    Approved,
    Rejected,
    Received,
    Closed,
}

impl ReturnStatus {
    /// Returns true if `to` is a legal successor of this status.
    pub fn can_transition_to(&self, to: ReturnStatus) -> bool {
        matches!(
            (self, to),
            (ReturnStatus::Requested, ReturnStatus::Approved)
                | (ReturnStatus::Requested, ReturnStatus::Rejected)
                | (ReturnStatus::Approved, ReturnStatus::Received)
                | (ReturnStatus::Received, ReturnStatus::Closed)
        )
    }

    /// An active request blocks initializing another. Rejected and closed
    /// requests are inactive; a new return may be opened after either.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ReturnStatus::Requested | ReturnStatus::Approved | ReturnStatus::Received
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnStatus::Requested => "requested",
            ReturnStatus::Approved => "approved",
            ReturnStatus::Rejected => "rejected",
            ReturnStatus::Received => "received",
            ReturnStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A return request attached to a delivered order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub status: ReturnStatus,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ReturnRequest {
    /// Opens a new request in `Requested`.
    pub fn new(reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: ReturnStatus::Requested,
            reason: reason.into(),
            requested_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    /// Advances the request to `to`, rejecting illegal successors.
    pub fn advance(&mut self, to: ReturnStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::IllegalReturnTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        if to == ReturnStatus::Closed {
            self.closed_at = Some(now);
        }
        Ok(())
    }
}

/// Unique identifier for a refund record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundId(Uuid);

impl RefundId {
    /// Creates a new random refund ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a refund ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RefundId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RefundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a refund record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Requested,
    Approved,
    Processing,
    Processed,
    Failed,
    Cancelled,
}

impl RefundStatus {
    /// Returns true if `to` is a legal successor. `Failed → Processing`
    /// models a retry of the payout.
    pub fn can_transition_to(&self, to: RefundStatus) -> bool {
        matches!(
            (self, to),
            (RefundStatus::Requested, RefundStatus::Approved)
                | (RefundStatus::Requested, RefundStatus::Cancelled)
                | (RefundStatus::Approved, RefundStatus::Processing)
                | (RefundStatus::Processing, RefundStatus::Processed)
                | (RefundStatus::Processing, RefundStatus::Failed)
                | (RefundStatus::Failed, RefundStatus::Processing)
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Requested => "REQUESTED",
            RefundStatus::Approved => "APPROVED",
            RefundStatus::Processing => "PROCESSING",
            RefundStatus::Processed => "PROCESSED",
            RefundStatus::Failed => "FAILED",
            RefundStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One refund against an order. Refunds live in their own append-only
/// ledger keyed by order id, independent of return status — a refund may
/// be issued for a cancelled order, a rejected-but-goodwill case, or a
/// completed return, and one order may accumulate several (partial
/// refunds, retries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub id: RefundId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub status: RefundStatus,
    pub amount: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundRecord {
    /// Opens a new refund record in `Requested`.
    pub fn new(
        order_id: OrderId,
        method: PaymentMethod,
        amount: Money,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RefundId::new(),
            order_id,
            method,
            status: RefundStatus::Requested,
            amount,
            processed_at: None,
            notes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advances the refund to `to`, rejecting illegal successors.
    pub fn advance(&mut self, to: RefundStatus, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::IllegalRefundTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        if to == RefundStatus::Processed {
            self.processed_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_happy_path() {
        let now = Utc::now();
        let mut request = ReturnRequest::new("wrong size", now);
        assert_eq!(request.status, ReturnStatus::Requested);
        assert!(request.status.is_active());

        request.advance(ReturnStatus::Approved, now).unwrap();
        request.advance(ReturnStatus::Received, now).unwrap();
        request.advance(ReturnStatus::Closed, now).unwrap();

        assert_eq!(request.status, ReturnStatus::Closed);
        assert!(request.closed_at.is_some());
        assert!(!request.status.is_active());
    }

    #[test]
    fn return_rejection_is_terminal() {
        let now = Utc::now();
        let mut request = ReturnRequest::new("damaged", now);
        request.advance(ReturnStatus::Rejected, now).unwrap();

        assert!(!request.status.is_active());
        let err = request.advance(ReturnStatus::Approved, now).unwrap_err();
        assert!(matches!(err, OrderError::IllegalReturnTransition { .. }));
    }

    #[test]
    fn return_cannot_skip_states() {
        let now = Utc::now();
        let mut request = ReturnRequest::new("wrong size", now);
        assert!(request.advance(ReturnStatus::Received, now).is_err());
        assert!(request.advance(ReturnStatus::Closed, now).is_err());
    }

    #[test]
    fn refund_happy_path() {
        let now = Utc::now();
        let mut refund = RefundRecord::new(
            OrderId::new(),
            PaymentMethod::Card,
            Money::from_cents(2500),
            None,
            now,
        );

        refund.advance(RefundStatus::Approved, now).unwrap();
        refund.advance(RefundStatus::Processing, now).unwrap();
        refund.advance(RefundStatus::Processed, now).unwrap();

        assert_eq!(refund.status, RefundStatus::Processed);
        assert!(refund.processed_at.is_some());
    }

    #[test]
    fn refund_retry_after_failure() {
        let now = Utc::now();
        let mut refund = RefundRecord::new(
            OrderId::new(),
            PaymentMethod::Bank,
            Money::from_cents(1000),
            Some("goodwill".into()),
            now,
        );

        refund.advance(RefundStatus::Approved, now).unwrap();
        refund.advance(RefundStatus::Processing, now).unwrap();
        refund.advance(RefundStatus::Failed, now).unwrap();
        // Payout retry.
        refund.advance(RefundStatus::Processing, now).unwrap();
        refund.advance(RefundStatus::Processed, now).unwrap();
    }

    #[test]
    fn refund_cancel_only_from_requested() {
        let now = Utc::now();
        let mut refund = RefundRecord::new(
            OrderId::new(),
            PaymentMethod::Cod,
            Money::from_cents(500),
            None,
            now,
        );
        refund.advance(RefundStatus::Approved, now).unwrap();
        assert!(refund.advance(RefundStatus::Cancelled, now).is_err());
    }
}
