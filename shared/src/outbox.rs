//! Transactional outbox store and the periodic publisher that drains it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tokio::time;
use tracing::{error, info};
use uuid::Uuid;

use crate::envelope::{Envelope, MessageContext};
use crate::error::DomainResult;
use crate::routing::route_event;
use crate::schema::outbox_events;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = outbox_events)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
struct NewOutboxEvent {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: Uuid,
    event_type: String,
    payload: serde_json::Value,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    idempotency_key: Option<String>,
    published: bool,
    created_at: DateTime<Utc>,
}

/// Writes one unpublished row holding the full envelope. Must be called
/// inside the transaction of the state change that causes the event.
/// Returns the envelope's event id.
pub async fn enqueue(
    conn: &mut AsyncPgConnection,
    producer: &str,
    aggregate_type: &str,
    aggregate_id: Uuid,
    event_type: &str,
    data: serde_json::Value,
    ctx: &MessageContext,
) -> DomainResult<Uuid> {
    let envelope = Envelope::new(event_type, producer, data, ctx);
    let event_id = envelope.meta.event_id;

    let row = NewOutboxEvent {
        id: Uuid::new_v4(),
        aggregate_type: aggregate_type.to_owned(),
        aggregate_id,
        event_type: event_type.to_owned(),
        payload: serde_json::to_value(&envelope)?,
        correlation_id: ctx.correlation_id.clone(),
        causation_id: ctx.causation_id.clone(),
        idempotency_key: ctx.idempotency_key.clone(),
        published: false,
        created_at: Utc::now(),
    };

    diesel::insert_into(outbox_events::table)
        .values(&row)
        .execute(conn)
        .await?;

    Ok(event_id)
}

pub struct OutboxPublisher {
    pool: DbPool,
    producer: FutureProducer,
    batch_size: i64,
    interval: Duration,
}

impl OutboxPublisher {
    pub fn new(pool: DbPool, producer: FutureProducer, batch_size: i64, interval: Duration) -> Self {
        Self {
            pool,
            producer,
            batch_size,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.drain_once().await {
                Ok(0) => {}
                Ok(count) => info!("published {count} outbox events"),
                Err(e) => error!("outbox publish pass failed: {e:#}"),
            }
        }
    }

    /// Publishes the oldest unpublished rows, marking each one published
    /// right after its send. A crash between send and mark resends the row
    /// on the next pass; downstream idempotency absorbs the duplicate. The
    /// pass stops at the first send failure so per-aggregate ordering is
    /// never violated by skipping ahead.
    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_events::table
            .filter(outbox_events::published.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(self.batch_size)
            .load::<OutboxEvent>(&mut conn)
            .await?;

        let mut sent = 0;
        for event in pending {
            let topic = route_event(&event.event_type);
            let payload = serde_json::to_string(&event.payload)?;
            let key = event.aggregate_id.to_string();
            let record = FutureRecord::to(topic).payload(&payload).key(&key);

            self.producer
                .send(record, Duration::from_secs(5))
                .await
                .map_err(|(e, _)| {
                    anyhow::anyhow!("failed to publish outbox event {}: {}", event.id, e)
                })?;

            diesel::update(outbox_events::table.filter(outbox_events::id.eq(event.id)))
                .set((
                    outbox_events::published.eq(true),
                    outbox_events::published_at.eq(Utc::now()),
                ))
                .execute(&mut conn)
                .await?;
            sent += 1;
        }

        Ok(sent)
    }
}
