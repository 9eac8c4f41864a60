//! Proof-of-delivery evidence and reason codes for negative outcomes.

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// Proof-of-delivery payload supplied by the delivery agent.
///
/// At least one piece of evidence is required to close a delivery: an OTP
/// the customer read back, a photo reference, or a signature reference.
/// Empty strings count as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeliveryEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_url: Option<String>,
}

impl DeliveryEvidence {
    /// Validates the payload. Runs before any state mutation so a rejected
    /// delivery leaves zero side effects.
    pub fn validate(&self) -> Result<(), OrderError> {
        if non_empty(&self.pod_photo_url) || non_empty(&self.signature_url) {
            return Ok(());
        }

        match self.otp.as_deref().map(str::trim) {
            Some(otp) if !otp.is_empty() => {
                if is_valid_otp(otp) {
                    Ok(())
                } else {
                    Err(OrderError::EvidenceInvalid {
                        reason: "OTP must be 4 to 6 digits",
                    })
                }
            }
            _ => Err(OrderError::EvidenceMissing),
        }
    }
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn is_valid_otp(otp: &str) -> bool {
    (4..=6).contains(&otp.len()) && otp.bytes().all(|b| b.is_ascii_digit())
}

/// Reason attached to a negative or exceptional transition: a short
/// enumerated code, free-text detail, or both. Both empty is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutcomeReason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OutcomeReason {
    /// Creates a reason from a code.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            detail: None,
        }
    }

    /// Creates a reason from free-text detail.
    pub fn from_detail(detail: impl Into<String>) -> Self {
        Self {
            code: None,
            detail: Some(detail.into()),
        }
    }

    /// Validates that at least one of code/detail is non-empty.
    pub fn validate(&self) -> Result<(), OrderError> {
        if non_empty(&self.code) || non_empty(&self.detail) {
            Ok(())
        } else {
            Err(OrderError::ReasonMissing)
        }
    }
}
