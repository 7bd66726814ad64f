//! Authorization/capture/void/refund bookkeeping, one payment per order.
//! Every mutation validates the current status first and claims the
//! transition with a status+version predicate, so a concurrent writer loses
//! cleanly instead of double-applying.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use shared::commands::{
    AuthorizePaymentCommand, CapturePaymentCommand, RefundPaymentCommand, VoidPaymentCommand,
};
use shared::events::{
    PaymentAuthorizationFailedData, PaymentAuthorizedData, PaymentCapturedData,
    PaymentRefundedData, PaymentVoidedData,
};
use shared::{DomainError, DomainResult};

use crate::gateway::{GatewayOutcome, MockPaymentGateway};
use crate::models::{Payment, PaymentStatus, Refund};
use crate::schema::{payments, refunds};

const DEFAULT_CURRENCY: &str = "KRW";
const DEFAULT_PAYMENT_METHOD: &str = "MOCK";
const REFUND_COMPLETED: &str = "COMPLETED";

pub struct EventDraft {
    pub event_type: &'static str,
    pub order_id: Uuid,
    pub data: serde_json::Value,
}

pub async fn handle_authorize(
    conn: &mut AsyncPgConnection,
    gateway: &MockPaymentGateway,
    command: &AuthorizePaymentCommand,
    idempotency_key: String,
) -> DomainResult<EventDraft> {
    if command.amount <= 0 {
        return Err(DomainError::Validation(
            "payment amount must be positive".to_owned(),
        ));
    }

    let result = gateway.authorize(command.amount).await;
    let now = Utc::now();
    let mut payment = Payment {
        id: Uuid::new_v4(),
        order_id: command.order_id,
        user_id: command.user_id,
        amount: command.amount,
        currency: command
            .currency
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        payment_method: command
            .payment_method
            .clone()
            .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_owned()),
        status: PaymentStatus::Pending.as_str().to_owned(),
        authorization_code: None,
        failure_reason: None,
        idempotency_key: Some(idempotency_key),
        version: 0,
        created_at: now,
        updated_at: now,
    };

    if result.outcome == GatewayOutcome::Approved {
        payment.status = PaymentStatus::Authorized.as_str().to_owned();
        payment.authorization_code = result.authorization_code.clone();
        diesel::insert_into(payments::table)
            .values(&payment)
            .execute(conn)
            .await?;

        let data = PaymentAuthorizedData {
            order_id: payment.order_id,
            payment_id: payment.id,
            amount: payment.amount,
            authorization_code: payment.authorization_code.clone(),
        };
        return Ok(EventDraft {
            event_type: "PaymentAuthorized",
            order_id: payment.order_id,
            data: serde_json::to_value(&data)?,
        });
    }

    payment.status = PaymentStatus::Failed.as_str().to_owned();
    payment.failure_reason = result.failure_reason.clone();
    diesel::insert_into(payments::table)
        .values(&payment)
        .execute(conn)
        .await?;

    let error_code = match result.outcome {
        GatewayOutcome::Timeout => "TIMEOUT",
        _ => "DECLINED",
    };
    let data = PaymentAuthorizationFailedData {
        order_id: payment.order_id,
        payment_id: Some(payment.id),
        reason: payment
            .failure_reason
            .clone()
            .unwrap_or_else(|| "authorization declined".to_owned()),
        error_code: error_code.to_owned(),
    };
    Ok(EventDraft {
        event_type: "PaymentAuthorizationFailed",
        order_id: payment.order_id,
        data: serde_json::to_value(&data)?,
    })
}

pub async fn handle_capture(
    conn: &mut AsyncPgConnection,
    command: &CapturePaymentCommand,
) -> DomainResult<EventDraft> {
    let payment = find_payment(conn, command.payment_id).await?;
    if !payment.status()?.can_capture() {
        return Err(DomainError::InvalidStateTransition(format!(
            "payment {} is {} and cannot be captured",
            payment.id, payment.status
        )));
    }

    let capture_amount = command.capture_amount.unwrap_or(payment.amount);
    transition(conn, &payment, PaymentStatus::Captured).await?;

    let data = PaymentCapturedData {
        order_id: payment.order_id,
        payment_id: payment.id,
        amount: capture_amount,
        captured_at: Utc::now(),
    };
    Ok(EventDraft {
        event_type: "PaymentCaptured",
        order_id: payment.order_id,
        data: serde_json::to_value(&data)?,
    })
}

pub async fn handle_void(
    conn: &mut AsyncPgConnection,
    command: &VoidPaymentCommand,
) -> DomainResult<EventDraft> {
    let payment = find_payment(conn, command.payment_id).await?;
    if !payment.status()?.can_void() {
        return Err(DomainError::InvalidStateTransition(format!(
            "payment {} is {} and only AUTHORIZED payments can be voided",
            payment.id, payment.status
        )));
    }

    transition(conn, &payment, PaymentStatus::Voided).await?;

    let data = PaymentVoidedData {
        order_id: payment.order_id,
        payment_id: payment.id,
        reason: command.reason.clone(),
        voided_at: Utc::now(),
    };
    Ok(EventDraft {
        event_type: "PaymentVoided",
        order_id: payment.order_id,
        data: serde_json::to_value(&data)?,
    })
}

pub async fn handle_refund(
    conn: &mut AsyncPgConnection,
    command: &RefundPaymentCommand,
) -> DomainResult<EventDraft> {
    let payment = find_payment(conn, command.payment_id).await?;
    if !payment.status()?.can_refund() {
        return Err(DomainError::InvalidStateTransition(format!(
            "payment {} is {} and only CAPTURED/REFUNDED payments can be refunded",
            payment.id, payment.status
        )));
    }

    let requested = command.refund_amount.unwrap_or(payment.amount);
    let existing = refunds::table
        .filter(refunds::payment_id.eq(payment.id))
        .load::<Refund>(conn)
        .await?;
    let already_refunded: i32 = existing.iter().map(|refund| refund.amount).sum();
    validate_refund_amount(payment.amount, already_refunded, requested)?;

    let refund = Refund {
        id: Uuid::new_v4(),
        payment_id: payment.id,
        order_id: payment.order_id,
        amount: requested,
        reason: command.reason.clone(),
        status: REFUND_COMPLETED.to_owned(),
        created_at: Utc::now(),
    };
    diesel::insert_into(refunds::table)
        .values(&refund)
        .execute(conn)
        .await?;

    // The version bump serializes concurrent refunds so the running-sum
    // check cannot be raced past the payment amount.
    transition(conn, &payment, PaymentStatus::Refunded).await?;

    let data = PaymentRefundedData {
        order_id: payment.order_id,
        payment_id: payment.id,
        refund_id: refund.id,
        amount: refund.amount,
        reason: refund.reason.clone(),
        refunded_at: Utc::now(),
    };
    Ok(EventDraft {
        event_type: "PaymentRefunded",
        order_id: payment.order_id,
        data: serde_json::to_value(&data)?,
    })
}

fn validate_refund_amount(
    payment_amount: i32,
    already_refunded: i32,
    requested: i32,
) -> DomainResult<()> {
    if requested <= 0 {
        return Err(DomainError::Validation(
            "refund amount must be positive".to_owned(),
        ));
    }
    let remaining = payment_amount - already_refunded;
    if requested > remaining {
        return Err(DomainError::Conflict(format!(
            "refund of {requested} exceeds remaining balance {remaining}"
        )));
    }
    Ok(())
}

async fn find_payment(conn: &mut AsyncPgConnection, payment_id: Uuid) -> DomainResult<Payment> {
    payments::table
        .find(payment_id)
        .first::<Payment>(conn)
        .await
        .optional()?
        .ok_or_else(|| DomainError::NotFound(format!("payment {payment_id}")))
}

async fn transition(
    conn: &mut AsyncPgConnection,
    payment: &Payment,
    target: PaymentStatus,
) -> DomainResult<()> {
    let updated = diesel::update(
        payments::table
            .filter(payments::id.eq(payment.id))
            .filter(payments::status.eq(&payment.status))
            .filter(payments::version.eq(payment.version)),
    )
    .set((
        payments::status.eq(target.as_str()),
        payments::version.eq(payment.version + 1),
        payments::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(DomainError::Conflict(format!(
            "payment {} changed concurrently",
            payment.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_half_refunds_fit_and_a_third_does_not() {
        assert!(validate_refund_amount(1000, 0, 500).is_ok());
        assert!(validate_refund_amount(1000, 500, 500).is_ok());
        assert!(matches!(
            validate_refund_amount(1000, 1000, 1),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn refunds_cannot_exceed_the_remaining_balance() {
        assert!(matches!(
            validate_refund_amount(1000, 300, 800),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn refund_amount_must_be_positive() {
        assert!(matches!(
            validate_refund_amount(1000, 0, 0),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            validate_refund_amount(1000, 0, -5),
            Err(DomainError::Validation(_))
        ));
    }
}
