//! Inventory command consumer.

use anyhow::Result;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::commands::{
    CancelInventoryReservationCommand, CommitInventoryCommand, ReserveInventoryCommand,
};
use shared::events::{
    InventoryCommittedData, InventoryReservationCancelledData, InventoryReservationFailedData,
    InventoryReservedData,
};
use shared::{idempotency, outbox, DomainError, DomainResult, Envelope, MessageContext};

use crate::engine;
use crate::models::ReservationStatus;

type DbPool = Pool<AsyncPgConnection>;

const CONSUMER_ID: &str = "inventory-service";
pub const PRODUCER: &str = "inventory-service";
pub const AGGREGATE_TYPE: &str = "RESERVATION";

struct EventDraft {
    event_type: &'static str,
    order_id: Uuid,
    data: serde_json::Value,
}

pub struct CommandHandler {
    pool: DbPool,
    reservation_ttl_minutes: i64,
}

impl CommandHandler {
    pub fn new(pool: DbPool, reservation_ttl_minutes: i64) -> Self {
        Self {
            pool,
            reservation_ttl_minutes,
        }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    let payload = match m.payload_view::<str>() {
                        Some(Ok(payload)) => payload,
                        _ => {
                            warn!("dropping command without a utf-8 payload");
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
                        Err(e) => error!("error handling command: {e:#}"),
                    }
                }
                Err(e) => error!("error receiving command: {e}"),
            }
        }
    }

    async fn process(&self, payload: &str) -> Result<()> {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed command envelope: {e}");
                return Ok(());
            }
        };

        let ttl_minutes = self.reservation_ttl_minutes;
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                if idempotency::is_processed(conn, CONSUMER_ID, envelope.meta.event_id).await? {
                    info!("skipping duplicate command {}", envelope.meta.event_id);
                    return Ok(());
                }

                match handle_command(conn, &envelope, ttl_minutes).await {
                    Ok(Some(event)) => {
                        let ctx = MessageContext::reply_to(&envelope.meta, event.order_id);
                        outbox::enqueue(
                            conn,
                            PRODUCER,
                            AGGREGATE_TYPE,
                            event.order_id,
                            event.event_type,
                            event.data,
                            &ctx,
                        )
                        .await?;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => warn!(
                        event_type = %envelope.meta.event_type,
                        "dropping command after handled failure: {e}"
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

async fn handle_command(
    conn: &mut AsyncPgConnection,
    envelope: &Envelope,
    ttl_minutes: i64,
) -> DomainResult<Option<EventDraft>> {
    match envelope.meta.event_type.as_str() {
        "ReserveInventoryCommand" => {
            let command: ReserveInventoryCommand = serde_json::from_value(envelope.data.clone())?;
            let order_id = command.order_id;

            // Reservation failures are a reply, not an error: any business
            // failure (insufficient stock, unknown sku, exhausted retries)
            // becomes an InventoryReservationFailed event.
            match run_reserve(conn, command, ttl_minutes).await {
                Ok(result) => {
                    let data = InventoryReservedData {
                        reservation_id: result.reservation.id,
                        order_id,
                        status: result.reservation.status.clone(),
                        expires_at: result.reservation.expires_at,
                        items: result.reserved_items(),
                    };
                    Ok(Some(EventDraft {
                        event_type: "InventoryReserved",
                        order_id,
                        data: serde_json::to_value(&data)?,
                    }))
                }
                Err(e) if e.is_transient() => Err(e),
                Err(e) => {
                    warn!("inventory reservation failed for order {order_id}: {e}");
                    let data = InventoryReservationFailedData {
                        order_id,
                        reason: e.to_string(),
                    };
                    Ok(Some(EventDraft {
                        event_type: "InventoryReservationFailed",
                        order_id,
                        data: serde_json::to_value(&data)?,
                    }))
                }
            }
        }
        "CommitInventoryCommand" => {
            let command: CommitInventoryCommand = serde_json::from_value(envelope.data.clone())?;
            let result = run_commit(conn, command).await?;
            let data = InventoryCommittedData {
                reservation_id: result.reservation.id,
                order_id: result.reservation.order_id,
                status: result.reservation.status.clone(),
                items: result.reserved_items(),
            };
            Ok(Some(EventDraft {
                event_type: "InventoryCommitted",
                order_id: result.reservation.order_id,
                data: serde_json::to_value(&data)?,
            }))
        }
        "CancelInventoryReservationCommand" => {
            let command: CancelInventoryReservationCommand =
                serde_json::from_value(envelope.data.clone())?;
            let reason = command
                .reason
                .clone()
                .unwrap_or_else(|| ReservationStatus::Cancelled.as_str().to_owned());
            let result = run_cancel(conn, command).await?;
            let data = InventoryReservationCancelledData {
                reservation_id: result.reservation.id,
                order_id: result.reservation.order_id,
                status: result.reservation.status.clone(),
                reason,
            };
            Ok(Some(EventDraft {
                event_type: "InventoryReservationCancelled",
                order_id: result.reservation.order_id,
                data: serde_json::to_value(&data)?,
            }))
        }
        other => {
            warn!("unsupported inventory command type: {other}");
            Ok(None)
        }
    }
}

// The engine mutates several rows per command; a savepoint keeps a failed
// command from leaving partial stock changes behind while the outer
// transaction still records the command as processed.

async fn run_reserve(
    conn: &mut AsyncPgConnection,
    command: ReserveInventoryCommand,
    ttl_minutes: i64,
) -> DomainResult<engine::ReservationWithItems> {
    conn.transaction::<_, DomainError, _>(move |conn| {
        Box::pin(async move { engine::reserve(conn, &command, ttl_minutes).await })
    })
    .await
}

async fn run_commit(
    conn: &mut AsyncPgConnection,
    command: CommitInventoryCommand,
) -> DomainResult<engine::ReservationWithItems> {
    conn.transaction::<_, DomainError, _>(move |conn| {
        Box::pin(async move { engine::commit(conn, &command).await })
    })
    .await
}

async fn run_cancel(
    conn: &mut AsyncPgConnection,
    command: CancelInventoryReservationCommand,
) -> DomainResult<engine::ReservationWithItems> {
    conn.transaction::<_, DomainError, _>(move |conn| {
        Box::pin(async move { engine::cancel(conn, &command).await })
    })
    .await
}
