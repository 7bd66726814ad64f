//! Per-consumer dedup guard for at-least-once delivery.
//!
//! Both calls must run inside the same transaction as the business effect:
//! a crash after the effect but before the mark rolls both back, so the
//! redelivered message reprocesses cleanly; a crash after the commit never
//! reprocesses.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::error::DomainResult;
use crate::schema::idempotency_store;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = idempotency_store)]
pub struct IdempotencyRecord {
    pub consumer_id: String,
    pub event_id: Uuid,
    pub processed_at: DateTime<Utc>,
}

pub async fn is_processed(
    conn: &mut AsyncPgConnection,
    consumer: &str,
    event_id: Uuid,
) -> DomainResult<bool> {
    let existing = idempotency_store::table
        .filter(idempotency_store::consumer_id.eq(consumer))
        .filter(idempotency_store::event_id.eq(event_id))
        .first::<IdempotencyRecord>(conn)
        .await
        .optional()?;
    Ok(existing.is_some())
}

pub async fn mark_processed(
    conn: &mut AsyncPgConnection,
    consumer: &str,
    event_id: Uuid,
) -> DomainResult<()> {
    let record = IdempotencyRecord {
        consumer_id: consumer.to_owned(),
        event_id,
        processed_at: Utc::now(),
    };

    diesel::insert_into(idempotency_store::table)
        .values(&record)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;

    Ok(())
}
