//! Order lifecycle operations and saga transitions.
//!
//! Every function here runs against the caller's connection so the caller
//! owns the transaction boundary: API handlers and the orchestrator open
//! one transaction per request/message and commit or roll back as a whole.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use shared::commands::{
    AuthorizePaymentCommand, CancelInventoryReservationCommand, CapturePaymentCommand,
    CommitInventoryCommand, RefundPaymentCommand, ReserveInventoryCommand, ReserveInventoryItem,
    VoidPaymentCommand,
};
use shared::events::{OrderCancelledData, OrderConfirmedData, OrderFailedData};
use shared::{outbox, DomainError, DomainResult, MessageContext};

use crate::models::{
    Order, OrderChangeset, OrderItem, OrderSagaStatus, OrderStatus, SagaContext, SagaState,
    SagaStatus,
};
use crate::schema::{order_items, orders, saga_state};

pub const PRODUCER: &str = "order-service";
const AGGREGATE_TYPE: &str = "ORDER";

const MAX_OPTIMISTIC_RETRIES: usize = 5;
const SAGA_STEP_TIMEOUT_MINUTES: i64 = 5;
const DEFAULT_CURRENCY: &str = "KRW";

pub const STEP_INVENTORY_RESERVATION: &str = "INVENTORY_RESERVATION";
pub const STEP_PAYMENT_AUTHORIZATION: &str = "PAYMENT_AUTHORIZATION";
pub const STEP_COMPLETION: &str = "COMPLETION";
pub const STEP_DONE: &str = "DONE";
pub const STEP_COMPENSATION: &str = "COMPENSATION";
pub const STEP_CANCELLED_BY_USER: &str = "CANCELLED_BY_USER";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    pub user_id: Uuid,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[serde(default)]
    pub sku: Option<String>,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: i32,
}

pub async fn find_order(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<Order> {
    orders::table
        .find(order_id)
        .first::<Order>(conn)
        .await
        .optional()?
        .ok_or_else(|| DomainError::NotFound(format!("order {order_id}")))
}

pub async fn load_items(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
) -> DomainResult<Vec<OrderItem>> {
    let items = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .load::<OrderItem>(conn)
        .await?;
    Ok(items)
}

pub async fn create_order(
    conn: &mut AsyncPgConnection,
    input: CreateOrderInput,
) -> DomainResult<Order> {
    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        user_id: input.user_id,
        status: OrderStatus::Draft.as_str().to_owned(),
        saga_status: OrderSagaStatus::None.as_str().to_owned(),
        total_amount: 0,
        currency: input.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_owned()),
        reservation_id: None,
        payment_id: None,
        idempotency_key: input.idempotency_key,
        failure_reason: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(orders::table)
        .values(&order)
        .execute(conn)
        .await?;

    Ok(order)
}

pub async fn add_item(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    input: OrderItemInput,
) -> DomainResult<Order> {
    validate_item(&input)?;
    let order = find_order(conn, order_id).await?;
    ensure_editable(&order)?;

    let item = OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: input.product_id,
        variant_id: input.variant_id,
        sku: input.sku,
        product_name: input.product_name,
        quantity: input.quantity,
        unit_price: input.unit_price,
    };

    diesel::insert_into(order_items::table)
        .values(&item)
        .execute(conn)
        .await?;

    refresh_total(conn, order_id).await
}

pub async fn update_item(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    item_id: Uuid,
    input: OrderItemInput,
) -> DomainResult<Order> {
    validate_item(&input)?;
    let order = find_order(conn, order_id).await?;
    ensure_editable(&order)?;

    let updated = diesel::update(
        order_items::table
            .filter(order_items::id.eq(item_id))
            .filter(order_items::order_id.eq(order_id)),
    )
    .set((
        order_items::product_id.eq(input.product_id),
        order_items::variant_id.eq(input.variant_id),
        order_items::sku.eq(input.sku),
        order_items::product_name.eq(input.product_name),
        order_items::quantity.eq(input.quantity),
        order_items::unit_price.eq(input.unit_price),
    ))
    .execute(conn)
    .await?;

    if updated == 0 {
        return Err(DomainError::NotFound(format!("order item {item_id}")));
    }

    refresh_total(conn, order_id).await
}

pub async fn remove_item(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    item_id: Uuid,
) -> DomainResult<Order> {
    let order = find_order(conn, order_id).await?;
    ensure_editable(&order)?;

    let removed = diesel::delete(
        order_items::table
            .filter(order_items::id.eq(item_id))
            .filter(order_items::order_id.eq(order_id)),
    )
    .execute(conn)
    .await?;

    if removed == 0 {
        return Err(DomainError::NotFound(format!("order item {item_id}")));
    }

    refresh_total(conn, order_id).await
}

pub async fn checkout(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<Order> {
    let order = find_order(conn, order_id).await?;
    ensure_status(&order, OrderStatus::Draft, "checkout allowed only for draft orders")?;

    let items = load_items(conn, order_id).await?;
    if items.is_empty() {
        return Err(DomainError::Validation("cannot checkout an empty order".to_owned()));
    }
    let total = recalculate_total(&items);

    update_order(conn, order_id, |order| {
        ensure_status(order, OrderStatus::Draft, "checkout allowed only for draft orders")?;
        order.total_amount = total;
        order.set_status(OrderStatus::PendingApproval);
        Ok(())
    })
    .await
}

/// Starts the saga: creates/refreshes the saga row at the reservation step
/// and enqueues the reservation command in the same transaction as the
/// order transition.
pub async fn approve(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<Order> {
    let order = find_order(conn, order_id).await?;
    ensure_status(&order, OrderStatus::PendingApproval, "order must be pending approval")?;

    let items = load_items(conn, order_id).await?;
    if items.is_empty() {
        return Err(DomainError::Validation("cannot start a saga for an empty order".to_owned()));
    }

    upsert_saga(conn, order_id, STEP_INVENTORY_RESERVATION).await?;

    let order = update_order(conn, order_id, |order| {
        ensure_status(order, OrderStatus::PendingApproval, "order must be pending approval")?;
        order.set_status(OrderStatus::InventoryReserving);
        order.set_saga_status(OrderSagaStatus::Running);
        Ok(())
    })
    .await?;

    let command = ReserveInventoryCommand {
        order_id,
        items: items
            .iter()
            .map(|item| ReserveInventoryItem {
                product_id: Some(item.product_id),
                variant_id: Some(item.variant_id),
                sku: item.sku.clone(),
                quantity: item.quantity,
            })
            .collect(),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("approve-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "ReserveInventoryCommand",
        serde_json::to_value(&command)?,
        &ctx,
    )
    .await?;

    Ok(order)
}

pub async fn cancel(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reason: Option<String>,
) -> DomainResult<Order> {
    let order = find_order(conn, order_id).await?;
    if !order.status()?.can_cancel() {
        return Err(DomainError::InvalidStateTransition(format!(
            "order in status {} cannot be cancelled",
            order.status
        )));
    }

    let reason = reason.unwrap_or_else(|| "Cancelled by user".to_owned());

    let mut compensating = false;
    if let Some(mut saga) = find_saga(conn, order_id).await? {
        if saga.status == SagaStatus::Running.as_str() {
            saga.status = SagaStatus::Compensating.as_str().to_owned();
            saga.current_step = STEP_CANCELLED_BY_USER.to_owned();
            saga.updated_at = Utc::now();
            diesel::update(saga_state::table.find(saga.id))
                .set(&saga)
                .execute(conn)
                .await?;
            create_compensation_commands(conn, &order, &reason).await?;
            compensating = true;
        }
    }

    let order = update_order(conn, order_id, |order| {
        order.set_status(OrderStatus::Cancelled);
        if compensating {
            order.set_saga_status(OrderSagaStatus::Compensating);
        }
        order.failure_reason = Some(reason.clone());
        Ok(())
    })
    .await?;

    let data = OrderCancelledData { order_id, reason: reason.clone() };
    let ctx = MessageContext::for_aggregate(order_id, format!("cancel-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "OrderCancelled",
        serde_json::to_value(&data)?,
        &ctx,
    )
    .await?;

    Ok(order)
}

pub async fn refund(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    amount: Option<i32>,
    reason: Option<String>,
) -> DomainResult<Order> {
    let order = find_order(conn, order_id).await?;
    ensure_status(&order, OrderStatus::Confirmed, "only confirmed orders can be refunded")?;
    let payment_id = order
        .payment_id
        .ok_or_else(|| DomainError::Validation("no payment to refund".to_owned()))?;

    let refund_amount = amount.unwrap_or(order.total_amount);
    if refund_amount <= 0 {
        return Err(DomainError::Validation("refund amount must be positive".to_owned()));
    }

    let order = update_order(conn, order_id, |order| {
        ensure_status(order, OrderStatus::Confirmed, "only confirmed orders can be refunded")?;
        order.set_status(OrderStatus::RefundRequested);
        Ok(())
    })
    .await?;

    let command = RefundPaymentCommand {
        order_id,
        payment_id,
        refund_amount: Some(refund_amount),
        reason: Some(reason.unwrap_or_else(|| "Customer requested refund".to_owned())),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("refund-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "RefundPaymentCommand",
        serde_json::to_value(&command)?,
        &ctx,
    )
    .await?;

    Ok(order)
}

/// InventoryReserved: record the reservation and request authorization.
pub async fn move_to_payment_authorizing(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reservation_id: Uuid,
) -> DomainResult<()> {
    let order = update_order(conn, order_id, |order| {
        ensure_status(
            order,
            OrderStatus::InventoryReserving,
            "order is not awaiting an inventory reservation",
        )?;
        order.reservation_id = Some(reservation_id);
        order.set_status(OrderStatus::PaymentAuthorizing);
        Ok(())
    })
    .await?;

    advance_saga(conn, order_id, STEP_PAYMENT_AUTHORIZATION, false).await?;

    let command = AuthorizePaymentCommand {
        order_id,
        user_id: order.user_id,
        amount: order.total_amount,
        currency: Some(order.currency.clone()),
        payment_method: Some("MOCK".to_owned()),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("authpay-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "AuthorizePaymentCommand",
        serde_json::to_value(&command)?,
        &ctx,
    )
    .await?;

    Ok(())
}

/// PaymentAuthorized: record the payment and request the two independent
/// completion halves (inventory commit + payment capture).
pub async fn handle_payment_authorized(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    payment_id: Uuid,
) -> DomainResult<()> {
    let order = update_order(conn, order_id, |order| {
        ensure_status(
            order,
            OrderStatus::PaymentAuthorizing,
            "order is not awaiting payment authorization",
        )?;
        order.payment_id = Some(payment_id);
        Ok(())
    })
    .await?;

    advance_saga(conn, order_id, STEP_COMPLETION, true).await?;

    let commit = CommitInventoryCommand {
        order_id,
        reservation_id: order.reservation_id,
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("commit-inv-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "CommitInventoryCommand",
        serde_json::to_value(&commit)?,
        &ctx,
    )
    .await?;

    let capture = CapturePaymentCommand {
        order_id,
        payment_id,
        capture_amount: Some(order.total_amount),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("capture-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "CapturePaymentCommand",
        serde_json::to_value(&capture)?,
        &ctx,
    )
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum CompletionSide {
    Inventory,
    Payment,
}

/// Records one completion half; confirms the order once both have arrived.
/// Completion events that arrive after the saga left the COMPLETION step
/// (user cancel, reaper timeout) are ignored.
pub async fn record_completion(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    side: CompletionSide,
) -> DomainResult<()> {
    let Some(mut saga) = find_saga(conn, order_id).await? else {
        debug!("no saga state for order {order_id}, ignoring completion event");
        return Ok(());
    };
    if saga.status != SagaStatus::Running.as_str() || saga.current_step != STEP_COMPLETION {
        debug!(
            "ignoring completion event for order {order_id} in saga step {} ({})",
            saga.current_step, saga.status
        );
        return Ok(());
    }

    let mut context: SagaContext = serde_json::from_value(saga.context.clone())?;
    match side {
        CompletionSide::Inventory => context.inventory_committed = true,
        CompletionSide::Payment => context.payment_captured = true,
    }
    saga.context = serde_json::to_value(context)?;
    saga.updated_at = Utc::now();
    diesel::update(saga_state::table.find(saga.id))
        .set(&saga)
        .execute(conn)
        .await?;

    if context.is_complete() {
        mark_confirmed(conn, order_id).await?;
    }

    Ok(())
}

pub async fn mark_failed(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reason: &str,
    step: &str,
) -> DomainResult<()> {
    let order = find_order(conn, order_id).await?;
    if !order.status()?.is_saga_active() {
        info!(
            "ignoring saga failure for order {order_id} in status {}",
            order.status
        );
        return Ok(());
    }

    update_order(conn, order_id, |order| {
        order.set_status(OrderStatus::Failed);
        order.set_saga_status(OrderSagaStatus::Failed);
        order.failure_reason = Some(reason.to_owned());
        Ok(())
    })
    .await?;

    if let Some(mut saga) = find_saga(conn, order_id).await? {
        saga.status = SagaStatus::Failed.as_str().to_owned();
        saga.current_step = step.to_owned();
        saga.updated_at = Utc::now();
        diesel::update(saga_state::table.find(saga.id))
            .set(&saga)
            .execute(conn)
            .await?;
    }

    let data = OrderFailedData {
        order_id,
        reason: reason.to_owned(),
        failed_step: step.to_owned(),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("failed-{order_id}-{step}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "OrderFailed",
        serde_json::to_value(&data)?,
        &ctx,
    )
    .await?;

    Ok(())
}

pub async fn mark_confirmed(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<()> {
    update_order(conn, order_id, |order| {
        order.set_status(OrderStatus::Confirmed);
        order.set_saga_status(OrderSagaStatus::Completed);
        Ok(())
    })
    .await?;

    if let Some(mut saga) = find_saga(conn, order_id).await? {
        saga.status = SagaStatus::Completed.as_str().to_owned();
        saga.current_step = STEP_DONE.to_owned();
        saga.updated_at = Utc::now();
        diesel::update(saga_state::table.find(saga.id))
            .set(&saga)
            .execute(conn)
            .await?;
    }

    let data = OrderConfirmedData {
        order_id,
        confirmed_at: Utc::now(),
    };
    let ctx = MessageContext::for_aggregate(order_id, format!("confirmed-{order_id}"));
    outbox::enqueue(
        conn,
        PRODUCER,
        AGGREGATE_TYPE,
        order_id,
        "OrderConfirmed",
        serde_json::to_value(&data)?,
        &ctx,
    )
    .await?;

    Ok(())
}

/// PaymentRefunded: complete the refund flow. Later refund events for an
/// already refunded order are no-ops.
pub async fn mark_refunded(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<()> {
    let order = find_order(conn, order_id).await?;
    if order.status()? != OrderStatus::RefundRequested {
        debug!(
            "ignoring refund event for order {order_id} in status {}",
            order.status
        );
        return Ok(());
    }

    update_order(conn, order_id, |order| {
        order.set_status(OrderStatus::Refunded);
        Ok(())
    })
    .await?;

    Ok(())
}

/// Used by the reaper when a saga step times out.
pub async fn mark_saga_compensating(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reason: &str,
) -> DomainResult<()> {
    update_order(conn, order_id, |order| {
        order.set_status(OrderStatus::Failed);
        order.set_saga_status(OrderSagaStatus::Compensating);
        order.failure_reason = Some(reason.to_owned());
        Ok(())
    })
    .await?;

    let mut saga = find_saga(conn, order_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("saga state for order {order_id}")))?;
    saga.status = SagaStatus::Compensating.as_str().to_owned();
    saga.current_step = STEP_COMPENSATION.to_owned();
    saga.updated_at = Utc::now();
    diesel::update(saga_state::table.find(saga.id))
        .set(&saga)
        .execute(conn)
        .await?;

    Ok(())
}

/// Enqueues the undo commands for whatever the saga acquired so far. Safe
/// to call repeatedly: the inventory and payment consumers reject cancel
/// and void on non-ACTIVE/non-AUTHORIZED state instead of failing
/// destructively.
pub async fn create_compensation_commands(
    conn: &mut AsyncPgConnection,
    order: &Order,
    reason: &str,
) -> DomainResult<()> {
    if let Some(reservation_id) = order.reservation_id {
        let command = CancelInventoryReservationCommand {
            order_id: order.id,
            reservation_id: Some(reservation_id),
            reason: Some(reason.to_owned()),
        };
        let ctx = MessageContext::for_aggregate(order.id, format!("cancel-inv-{}", order.id));
        outbox::enqueue(
            conn,
            PRODUCER,
            AGGREGATE_TYPE,
            order.id,
            "CancelInventoryReservationCommand",
            serde_json::to_value(&command)?,
            &ctx,
        )
        .await?;
    }

    if let Some(payment_id) = order.payment_id {
        let command = VoidPaymentCommand {
            order_id: order.id,
            payment_id,
            reason: Some(reason.to_owned()),
        };
        let ctx = MessageContext::for_aggregate(order.id, format!("void-pay-{}", order.id));
        outbox::enqueue(
            conn,
            PRODUCER,
            AGGREGATE_TYPE,
            order.id,
            "VoidPaymentCommand",
            serde_json::to_value(&command)?,
            &ctx,
        )
        .await?;
    }

    Ok(())
}

pub async fn find_timed_out_sagas(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
) -> DomainResult<Vec<SagaState>> {
    let sagas = saga_state::table
        .filter(saga_state::status.eq(SagaStatus::Running.as_str()))
        .filter(saga_state::timeout_at.lt(now))
        .load::<SagaState>(conn)
        .await?;
    Ok(sagas)
}

async fn find_saga(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
) -> DomainResult<Option<SagaState>> {
    let saga = saga_state::table
        .filter(saga_state::order_id.eq(order_id))
        .first::<SagaState>(conn)
        .await
        .optional()?;
    Ok(saga)
}

async fn upsert_saga(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    step: &str,
) -> DomainResult<SagaState> {
    let now = Utc::now();
    let timeout_at = now + Duration::minutes(SAGA_STEP_TIMEOUT_MINUTES);

    let saga = match find_saga(conn, order_id).await? {
        Some(mut saga) => {
            saga.current_step = step.to_owned();
            saga.status = SagaStatus::Running.as_str().to_owned();
            saga.timeout_at = timeout_at;
            saga.updated_at = now;
            saga.context = serde_json::to_value(SagaContext::default())?;
            diesel::update(saga_state::table.find(saga.id))
                .set(&saga)
                .execute(conn)
                .await?;
            saga
        }
        None => {
            let saga = SagaState {
                id: Uuid::new_v4(),
                order_id,
                current_step: step.to_owned(),
                status: SagaStatus::Running.as_str().to_owned(),
                started_at: now,
                updated_at: now,
                timeout_at,
                retry_count: 0,
                context: serde_json::to_value(SagaContext::default())?,
            };
            diesel::insert_into(saga_state::table)
                .values(&saga)
                .execute(conn)
                .await?;
            saga
        }
    };

    Ok(saga)
}

/// Moves the running saga to the next step and refreshes its timeout.
async fn advance_saga(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    step: &str,
    reset_context: bool,
) -> DomainResult<()> {
    let now = Utc::now();
    let mut saga = find_saga(conn, order_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("saga state for order {order_id}")))?;
    saga.current_step = step.to_owned();
    saga.timeout_at = now + Duration::minutes(SAGA_STEP_TIMEOUT_MINUTES);
    saga.updated_at = now;
    if reset_context {
        saga.context = serde_json::to_value(SagaContext::default())?;
    }
    diesel::update(saga_state::table.find(saga.id))
        .set(&saga)
        .execute(conn)
        .await?;
    Ok(())
}

async fn refresh_total(conn: &mut AsyncPgConnection, order_id: Uuid) -> DomainResult<Order> {
    let items = load_items(conn, order_id).await?;
    let total = recalculate_total(&items);
    update_order(conn, order_id, |order| {
        order.total_amount = total;
        Ok(())
    })
    .await
}

/// Read-compute-write with a version predicate. A lost version race gets a
/// fresh read; after the bounded attempts it surfaces as an optimistic-lock
/// failure.
async fn update_order<F>(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    mut apply: F,
) -> DomainResult<Order>
where
    F: FnMut(&mut Order) -> DomainResult<()>,
{
    for _ in 0..MAX_OPTIMISTIC_RETRIES {
        let mut order = find_order(conn, order_id).await?;
        let expected_version = order.version;
        apply(&mut order)?;
        order.version = expected_version + 1;
        order.updated_at = Utc::now();

        let changeset = OrderChangeset::from(&order);
        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(order_id))
                .filter(orders::version.eq(expected_version)),
        )
        .set(&changeset)
        .execute(conn)
        .await?;

        if updated == 1 {
            return Ok(order);
        }
    }

    Err(DomainError::OptimisticLock(format!("order {order_id}")))
}

fn ensure_editable(order: &Order) -> DomainResult<()> {
    if !order.status()?.is_editable() {
        return Err(DomainError::InvalidStateTransition(format!(
            "order is not editable in status {}",
            order.status
        )));
    }
    Ok(())
}

fn ensure_status(order: &Order, required: OrderStatus, message: &str) -> DomainResult<()> {
    if order.status()? != required {
        return Err(DomainError::InvalidStateTransition(format!(
            "{message} (current status {})",
            order.status
        )));
    }
    Ok(())
}

fn validate_item(input: &OrderItemInput) -> DomainResult<()> {
    if input.quantity <= 0 {
        return Err(DomainError::Validation("item quantity must be positive".to_owned()));
    }
    if input.unit_price < 0 {
        return Err(DomainError::Validation("item unit price cannot be negative".to_owned()));
    }
    Ok(())
}

pub fn recalculate_total(items: &[OrderItem]) -> i32 {
    items.iter().map(|item| item.quantity * item.unit_price).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, unit_price: i32) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: None,
            product_name: "thing".to_owned(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn total_is_the_sum_over_items() {
        let items = vec![item(2, 1500), item(1, 700)];
        assert_eq!(recalculate_total(&items), 3700);
    }

    #[test]
    fn empty_orders_have_zero_total() {
        assert_eq!(recalculate_total(&[]), 0);
    }

    #[test]
    fn items_must_have_positive_quantity() {
        let input = OrderItemInput {
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: None,
            product_name: "thing".to_owned(),
            quantity: 0,
            unit_price: 100,
        };
        assert!(matches!(
            validate_item(&input),
            Err(DomainError::Validation(_))
        ));
    }
}
