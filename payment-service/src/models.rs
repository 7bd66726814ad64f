use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use shared::{DomainError, DomainResult};

/// Payment state machine: PENDING -> AUTHORIZED | FAILED,
/// AUTHORIZED -> CAPTURED | VOIDED, CAPTURED -> REFUNDED (repeatable while
/// the refund sum stays within the payment amount).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Voided,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Voided => "VOIDED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "PENDING" => Ok(PaymentStatus::Pending),
            "AUTHORIZED" => Ok(PaymentStatus::Authorized),
            "CAPTURED" => Ok(PaymentStatus::Captured),
            "VOIDED" => Ok(PaymentStatus::Voided),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(DomainError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }

    pub fn can_capture(&self) -> bool {
        matches!(self, PaymentStatus::Authorized)
    }

    pub fn can_void(&self) -> bool {
        matches!(self, PaymentStatus::Authorized)
    }

    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Captured | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i32,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub authorization_code: Option<String>,
    pub failure_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn status(&self) -> DomainResult<PaymentStatus> {
        PaymentStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::refunds)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: i32,
    pub reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_round_trips_through_storage_form() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Authorized,
            PaymentStatus::Captured,
            PaymentStatus::Voided,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn only_authorized_payments_can_be_captured_or_voided() {
        assert!(PaymentStatus::Authorized.can_capture());
        assert!(PaymentStatus::Authorized.can_void());
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Captured,
            PaymentStatus::Voided,
            PaymentStatus::Refunded,
            PaymentStatus::Failed,
        ] {
            assert!(!status.can_capture());
            assert!(!status.can_void());
        }
    }

    #[test]
    fn captured_and_refunded_payments_can_be_refunded() {
        assert!(PaymentStatus::Captured.can_refund());
        assert!(PaymentStatus::Refunded.can_refund());
        assert!(!PaymentStatus::Authorized.can_refund());
        assert!(!PaymentStatus::Voided.can_refund());
    }
}
