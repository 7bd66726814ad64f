//! Reservation expiry sweep: the only place a reservation transitions
//! without an explicit command. Backstops lost commit/cancel commands.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use tokio::time;
use tracing::{error, info};

use shared::events::InventoryReservationCancelledData;
use shared::{outbox, DomainError, MessageContext};

use crate::engine;
use crate::handlers::{AGGREGATE_TYPE, PRODUCER};
use crate::models::ReservationStatus;

type DbPool = Pool<AsyncPgConnection>;

const EXPIRY_REASON: &str = "EXPIRED";

pub struct ReservationExpirySweep {
    pool: DbPool,
    interval: Duration,
}

impl ReservationExpirySweep {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(&self) {
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => info!("expired {count} reservations"),
                Err(e) => error!("reservation expiry pass failed: {e:#}"),
            }
        }
    }

    /// One transaction per reservation: a racing commit/cancel wins cleanly
    /// and the sweep moves on.
    pub async fn sweep_once(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let expired = engine::find_expired(&mut conn, Utc::now()).await?;

        let mut count = 0;
        for reservation in expired {
            let reservation_id = reservation.id;
            let order_id = reservation.order_id;

            let outcome = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move {
                        let Some(_result) = engine::expire_one(conn, reservation_id).await? else {
                            return Ok(false);
                        };

                        let data = InventoryReservationCancelledData {
                            reservation_id,
                            order_id,
                            status: ReservationStatus::Expired.as_str().to_owned(),
                            reason: EXPIRY_REASON.to_owned(),
                        };
                        let ctx = MessageContext::for_aggregate(
                            order_id,
                            format!("expire-{reservation_id}"),
                        );
                        outbox::enqueue(
                            conn,
                            PRODUCER,
                            AGGREGATE_TYPE,
                            order_id,
                            "InventoryReservationCancelled",
                            serde_json::to_value(&data)?,
                            &ctx,
                        )
                        .await?;
                        Ok(true)
                    })
                })
                .await;

            match outcome {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => error!("failed to expire reservation {reservation_id}: {e}"),
            }
        }

        Ok(count)
    }
}
