use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::{DomainError, DomainResult};

/// Order lifecycle state machine.
///
/// DRAFT -> PENDING_APPROVAL -> INVENTORY_RESERVING -> PAYMENT_AUTHORIZING
/// -> CONFIRMED -> REFUND_REQUESTED -> REFUNDED, with FAILED reachable from
/// the two saga steps and CANCELLED from any non-terminal state except
/// CONFIRMED/REFUNDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Draft,
    PendingApproval,
    InventoryReserving,
    PaymentAuthorizing,
    Confirmed,
    Failed,
    Cancelled,
    RefundRequested,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::PendingApproval => "PENDING_APPROVAL",
            OrderStatus::InventoryReserving => "INVENTORY_RESERVING",
            OrderStatus::PaymentAuthorizing => "PAYMENT_AUTHORIZING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::RefundRequested => "REFUND_REQUESTED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "DRAFT" => Ok(OrderStatus::Draft),
            "PENDING_APPROVAL" => Ok(OrderStatus::PendingApproval),
            "INVENTORY_RESERVING" => Ok(OrderStatus::InventoryReserving),
            "PAYMENT_AUTHORIZING" => Ok(OrderStatus::PaymentAuthorizing),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUND_REQUESTED" => Ok(OrderStatus::RefundRequested),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(DomainError::Validation(format!("unknown order status: {other}"))),
        }
    }

    /// Items can only be edited while the order is a draft.
    pub fn is_editable(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    /// A saga step is in flight and still expects an event.
    pub fn is_saga_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::InventoryReserving | OrderStatus::PaymentAuthorizing
        )
    }

    pub fn can_cancel(&self) -> bool {
        !matches!(self, OrderStatus::Confirmed | OrderStatus::Refunded)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse saga phase carried on the order row, kept in lock-step with the
/// saga_state row's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSagaStatus {
    None,
    Running,
    Completed,
    Compensating,
    Failed,
}

impl OrderSagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSagaStatus::None => "NONE",
            OrderSagaStatus::Running => "RUNNING",
            OrderSagaStatus::Completed => "COMPLETED",
            OrderSagaStatus::Compensating => "COMPENSATING",
            OrderSagaStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Running,
    Compensating,
    Completed,
    Failed,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "RUNNING",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub saga_status: String,
    pub total_amount: i32,
    pub currency: String,
    pub reservation_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub idempotency_key: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn status(&self) -> DomainResult<OrderStatus> {
        OrderStatus::parse(&self.status)
    }

    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status.as_str().to_owned();
    }

    pub fn set_saga_status(&mut self, status: OrderSagaStatus) {
        self.saga_status = status.as_str().to_owned();
    }
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = crate::schema::orders)]
pub struct OrderChangeset {
    pub status: String,
    pub saga_status: String,
    pub total_amount: i32,
    pub reservation_id: Option<Uuid>,
    pub payment_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderChangeset {
    fn from(order: &Order) -> Self {
        Self {
            status: order.status.clone(),
            saga_status: order.saga_status.clone(),
            total_amount: order.total_amount,
            reservation_id: order.reservation_id,
            payment_id: order.payment_id,
            failure_reason: order.failure_reason.clone(),
            version: order.version,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::order_items)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub sku: Option<String>,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::saga_state)]
pub struct SagaState {
    pub id: Uuid,
    pub order_id: Uuid,
    pub current_step: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub retry_count: i32,
    pub context: serde_json::Value,
}

/// Joint-completion tracking for the COMPLETION step: the order is only
/// confirmed once both the inventory commit and the payment capture have
/// been observed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SagaContext {
    pub inventory_committed: bool,
    pub payment_captured: bool,
}

impl SagaContext {
    pub fn is_complete(&self) -> bool {
        self.inventory_committed && self.payment_captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_round_trips_through_storage_form() {
        for status in [
            OrderStatus::Draft,
            OrderStatus::PendingApproval,
            OrderStatus::InventoryReserving,
            OrderStatus::PaymentAuthorizing,
            OrderStatus::Confirmed,
            OrderStatus::Failed,
            OrderStatus::Cancelled,
            OrderStatus::RefundRequested,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        assert!(matches!(
            OrderStatus::parse("PLACED"),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn only_drafts_are_editable() {
        assert!(OrderStatus::Draft.is_editable());
        assert!(!OrderStatus::PendingApproval.is_editable());
        assert!(!OrderStatus::Confirmed.is_editable());
    }

    #[test]
    fn confirmed_and_refunded_orders_cannot_be_cancelled() {
        assert!(!OrderStatus::Confirmed.can_cancel());
        assert!(!OrderStatus::Refunded.can_cancel());
        assert!(OrderStatus::Draft.can_cancel());
        assert!(OrderStatus::InventoryReserving.can_cancel());
        assert!(OrderStatus::PaymentAuthorizing.can_cancel());
        assert!(OrderStatus::RefundRequested.can_cancel());
        assert!(OrderStatus::Failed.can_cancel());
    }

    #[test]
    fn saga_is_active_only_during_reservation_and_authorization() {
        assert!(OrderStatus::InventoryReserving.is_saga_active());
        assert!(OrderStatus::PaymentAuthorizing.is_saga_active());
        assert!(!OrderStatus::Draft.is_saga_active());
        assert!(!OrderStatus::Confirmed.is_saga_active());
    }

    #[test]
    fn saga_context_requires_both_halves() {
        let mut context = SagaContext::default();
        assert!(!context.is_complete());
        context.inventory_committed = true;
        assert!(!context.is_complete());
        context.payment_captured = true;
        assert!(context.is_complete());
    }

    #[test]
    fn saga_context_survives_missing_fields() {
        let context: SagaContext = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!context.inventory_committed);
        assert!(!context.payment_captured);

        let context: SagaContext =
            serde_json::from_value(serde_json::json!({"inventoryCommitted": true})).unwrap();
        assert!(context.inventory_committed);
        assert!(!context.payment_captured);
    }
}
