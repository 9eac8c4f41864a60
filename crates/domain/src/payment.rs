//! Payment sub-ledger: method, status, and method-specific metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OrderError;
use crate::state::{PaymentMethod, PaymentStatus};

/// Bank-transfer metadata: the customer's slip reference and the moment an
/// operator verified it. A BANK payment may only move to PAID once
/// `verified_at` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransfer {
    pub slip_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Outcome reported by the payment gateway callback for CARD orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayOutcome {
    Authorized,
    Paid,
    Failed,
}

impl GatewayOutcome {
    /// The payment status this outcome maps to.
    pub fn status(&self) -> PaymentStatus {
        match self {
            GatewayOutcome::Authorized => PaymentStatus::Authorized,
            GatewayOutcome::Paid => PaymentStatus::Paid,
            GatewayOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

/// The payment sub-ledger embedded in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<BankTransfer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ref: Option<String>,
}

impl Payment {
    /// Creates the payment record for a freshly placed order.
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            status: method.initial_status(),
            bank: None,
            gateway_ref: None,
        }
    }

    /// Returns true if fulfillment actions (pack, dispatch) may proceed:
    /// the payment is settled, or collection happens at the door (COD).
    pub fn allows_fulfillment(&self) -> bool {
        self.status == PaymentStatus::Paid || self.method == PaymentMethod::Cod
    }

    /// Applies a status change, enforcing the method-specific legal set.
    ///
    /// Returns `Ok(false)` for a same-status write: duplicate gateway
    /// callbacks and sweep retries are no-ops, never errors.
    ///
    /// Legal sets:
    /// - COD: UNPAID→PENDING→PAID (PAID applied at delivery handover)
    /// - CARD: PENDING→AUTHORIZED→PAID, PENDING→PAID (collapsed gateway
    ///   notification), PENDING→FAILED
    /// - BANK: PENDING→PAID (slip verified only), PENDING→FAILED (expiry
    ///   sweep only)
    /// - all methods: PAID→REFUND_PENDING→REFUNDED
    pub fn set_status(&mut self, new: PaymentStatus) -> Result<bool, OrderError> {
        use PaymentMethod as M;
        use PaymentStatus as P;

        if self.status == new {
            return Ok(false);
        }

        let legal = match (self.method, self.status, new) {
            (_, P::Paid, P::RefundPending) | (_, P::RefundPending, P::Refunded) => true,
            (M::Cod, P::Unpaid, P::Pending) | (M::Cod, P::Pending, P::Paid) => true,
            (M::Card, P::Pending, P::Authorized)
            | (M::Card, P::Pending, P::Paid)
            | (M::Card, P::Pending, P::Failed)
            | (M::Card, P::Authorized, P::Paid) => true,
            (M::Bank, P::Pending, P::Paid) => {
                if !self.slip_verified() {
                    return Err(OrderError::BankSlipUnverified);
                }
                true
            }
            (M::Bank, P::Pending, P::Failed) => true,
            _ => false,
        };

        if !legal {
            return Err(OrderError::IllegalPaymentTransition {
                method: self.method,
                from: self.status,
                to: new,
            });
        }

        self.status = new;
        Ok(true)
    }

    /// Records the slip reference for a bank transfer. Verification is a
    /// separate step.
    pub fn attach_bank_slip(&mut self, slip_ref: impl Into<String>) {
        self.bank = Some(BankTransfer {
            slip_ref: slip_ref.into(),
            verified_at: None,
        });
    }

    /// Marks the bank slip verified and settles the payment. The only path
    /// by which a BANK payment reaches PAID.
    pub fn verify_bank_slip(
        &mut self,
        slip_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if self.method != PaymentMethod::Bank {
            return Err(OrderError::IllegalPaymentTransition {
                method: self.method,
                from: self.status,
                to: PaymentStatus::Paid,
            });
        }
        if self.status == PaymentStatus::Paid {
            // Duplicate verification attempt.
            return Ok(false);
        }
        self.bank = Some(BankTransfer {
            slip_ref: slip_ref.into(),
            verified_at: Some(now),
        });
        self.set_status(PaymentStatus::Paid)
    }

    fn slip_verified(&self) -> bool {
        self.bank
            .as_ref()
            .is_some_and(|bank| bank.verified_at.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cod_legal_path() {
        let mut payment = Payment::new(PaymentMethod::Cod);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.allows_fulfillment());

        assert!(payment.set_status(PaymentStatus::Paid).unwrap());
        assert_eq!(payment.status, PaymentStatus::Paid);
    }

    #[test]
    fn cod_rejects_gateway_statuses() {
        let mut payment = Payment::new(PaymentMethod::Cod);
        assert!(matches!(
            payment.set_status(PaymentStatus::Authorized),
            Err(OrderError::IllegalPaymentTransition { .. })
        ));
        assert!(matches!(
            payment.set_status(PaymentStatus::Failed),
            Err(OrderError::IllegalPaymentTransition { .. })
        ));
    }

    #[test]
    fn card_authorize_then_capture() {
        let mut payment = Payment::new(PaymentMethod::Card);
        assert!(!payment.allows_fulfillment());

        payment.set_status(PaymentStatus::Authorized).unwrap();
        payment.set_status(PaymentStatus::Paid).unwrap();
        assert!(payment.allows_fulfillment());
    }

    #[test]
    fn card_collapsed_paid_notification() {
        let mut payment = Payment::new(PaymentMethod::Card);
        assert!(payment.set_status(PaymentStatus::Paid).unwrap());
    }

    #[test]
    fn card_failure_path() {
        let mut payment = Payment::new(PaymentMethod::Card);
        payment.set_status(PaymentStatus::Failed).unwrap();
        // A failed card payment cannot be resurrected in place.
        assert!(payment.set_status(PaymentStatus::Paid).is_err());
    }

    #[test]
    fn same_status_write_is_noop() {
        let mut payment = Payment::new(PaymentMethod::Card);
        payment.set_status(PaymentStatus::Paid).unwrap();
        // Duplicate gateway callback.
        assert!(!payment.set_status(PaymentStatus::Paid).unwrap());
    }

    #[test]
    fn bank_requires_verified_slip() {
        let mut payment = Payment::new(PaymentMethod::Bank);
        assert!(matches!(
            payment.set_status(PaymentStatus::Paid),
            Err(OrderError::BankSlipUnverified)
        ));

        // Attaching a slip is not enough; it must be verified.
        payment.attach_bank_slip("SLIP-001");
        assert!(matches!(
            payment.set_status(PaymentStatus::Paid),
            Err(OrderError::BankSlipUnverified)
        ));

        payment.verify_bank_slip("SLIP-001", Utc::now()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Paid);
        assert!(payment.bank.as_ref().unwrap().verified_at.is_some());
    }

    #[test]
    fn bank_verification_is_idempotent() {
        let mut payment = Payment::new(PaymentMethod::Bank);
        assert!(payment.verify_bank_slip("SLIP-001", Utc::now()).unwrap());
        assert!(!payment.verify_bank_slip("SLIP-001", Utc::now()).unwrap());
    }

    #[test]
    fn bank_expiry_failure() {
        let mut payment = Payment::new(PaymentMethod::Bank);
        payment.set_status(PaymentStatus::Failed).unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[test]
    fn refund_path_for_any_method() {
        for method in [PaymentMethod::Cod, PaymentMethod::Card, PaymentMethod::Bank] {
            let mut payment = Payment::new(method);
            if method == PaymentMethod::Bank {
                payment.verify_bank_slip("SLIP-001", Utc::now()).unwrap();
            } else {
                payment.set_status(PaymentStatus::Paid).unwrap();
            }
            payment.set_status(PaymentStatus::RefundPending).unwrap();
            payment.set_status(PaymentStatus::Refunded).unwrap();
        }
    }

    #[test]
    fn verify_bank_slip_rejected_for_card() {
        let mut payment = Payment::new(PaymentMethod::Card);
        assert!(payment.verify_bank_slip("SLIP-001", Utc::now()).is_err());
    }
}
