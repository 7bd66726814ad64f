//! Saga orchestrator: consumes inventory and payment events and drives the
//! order state machine.

use anyhow::Result;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::{debug, error, info, warn};

use shared::events::{
    InventoryCommittedData, InventoryReservationFailedData, InventoryReservedData,
    PaymentAuthorizationFailedData, PaymentAuthorizedData, PaymentCapturedData,
    PaymentRefundedData,
};
use shared::{idempotency, DomainError, DomainResult, Envelope};

use crate::service::{self, CompletionSide, STEP_INVENTORY_RESERVATION, STEP_PAYMENT_AUTHORIZATION};

type DbPool = Pool<AsyncPgConnection>;

const CONSUMER_ID: &str = "order-saga-orchestrator";

pub struct SagaOrchestrator {
    pool: DbPool,
}

impl SagaOrchestrator {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    let payload = match m.payload_view::<str>() {
                        Some(Ok(payload)) => payload,
                        _ => {
                            warn!("dropping event without a utf-8 payload");
                            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                                error!("error committing offset: {e}");
                            }
                            continue;
                        }
                    };

                    match self.process(payload).await {
                        Ok(()) => {
                            if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                                error!("error committing offset: {e}");
                            }
                        }
                        // Offset stays uncommitted; the broker redelivers.
                        Err(e) => error!("error handling event: {e:#}"),
                    }
                }
                Err(e) => error!("error receiving event: {e}"),
            }
        }
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed event envelope: {e}");
                return Ok(());
            }
        };

        let mut conn = self.pool.get().await?;
        conn.transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                if idempotency::is_processed(conn, CONSUMER_ID, envelope.meta.event_id).await? {
                    info!("skipping duplicate event {}", envelope.meta.event_id);
                    return Ok(());
                }

                match dispatch(conn, &envelope).await {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => warn!(
                        event_type = %envelope.meta.event_type,
                        "dropping event after handled failure: {e}"
                    ),
                }

                idempotency::mark_processed(conn, CONSUMER_ID, envelope.meta.event_id).await?;
                Ok(())
            })
        })
        .await?;

        Ok(())
    }
}

/// Runs the per-event transition inside a savepoint so a failed transition
/// rolls back cleanly while the outer transaction still records the event
/// as processed.
async fn dispatch(conn: &mut AsyncPgConnection, envelope: &Envelope) -> DomainResult<()> {
    let event_type = envelope.meta.event_type.clone();
    let data = envelope.data.clone();

    conn.transaction::<_, DomainError, _>(move |conn| {
        Box::pin(async move {
            match event_type.as_str() {
                "InventoryReserved" => {
                    let data: InventoryReservedData = serde_json::from_value(data)?;
                    service::move_to_payment_authorizing(conn, data.order_id, data.reservation_id)
                        .await
                }
                "InventoryReservationFailed" => {
                    let data: InventoryReservationFailedData = serde_json::from_value(data)?;
                    let order = service::find_order(conn, data.order_id).await?;
                    service::create_compensation_commands(conn, &order, &data.reason).await?;
                    service::mark_failed(conn, data.order_id, &data.reason, STEP_INVENTORY_RESERVATION)
                        .await
                }
                "InventoryCommitted" => {
                    let data: InventoryCommittedData = serde_json::from_value(data)?;
                    service::record_completion(conn, data.order_id, CompletionSide::Inventory).await
                }
                "PaymentAuthorized" => {
                    let data: PaymentAuthorizedData = serde_json::from_value(data)?;
                    service::handle_payment_authorized(conn, data.order_id, data.payment_id).await
                }
                "PaymentAuthorizationFailed" => {
                    let data: PaymentAuthorizationFailedData = serde_json::from_value(data)?;
                    let order = service::find_order(conn, data.order_id).await?;
                    service::create_compensation_commands(conn, &order, &data.reason).await?;
                    service::mark_failed(conn, data.order_id, &data.reason, STEP_PAYMENT_AUTHORIZATION)
                        .await
                }
                "PaymentCaptured" => {
                    let data: PaymentCapturedData = serde_json::from_value(data)?;
                    service::record_completion(conn, data.order_id, CompletionSide::Payment).await
                }
                "PaymentRefunded" => {
                    let data: PaymentRefundedData = serde_json::from_value(data)?;
                    service::mark_refunded(conn, data.order_id).await
                }
                other => {
                    debug!("ignoring unrelated event type {other}");
                    Ok(())
                }
            }
        })
    })
    .await
}
