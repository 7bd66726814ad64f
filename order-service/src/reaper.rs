//! Timeout backstop: sagas stuck in RUNNING past their step timeout are
//! compensated exactly like a business failure. Without this, a lost event
//! would strand an order forever.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use tokio::time;
use tracing::{error, warn};

use shared::DomainError;

use crate::service;

type DbPool = Pool<AsyncPgConnection>;

pub struct StuckSagaReaper {
    pool: DbPool,
    interval: Duration,
}

impl StuckSagaReaper {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(&self) {
        let mut ticker = time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.reap_once().await {
                error!("saga reaper pass failed: {e:#}");
            }
        }
    }

    /// Each timed-out saga is handled in its own transaction so one bad row
    /// cannot block the rest of the batch.
    pub async fn reap_once(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let timed_out = service::find_timed_out_sagas(&mut conn, Utc::now()).await?;

        let mut reaped = 0;
        for saga in timed_out {
            let order_id = saga.order_id;
            let reason = format!("Saga timeout while in step {}", saga.current_step);

            let outcome = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move {
                        let order = service::find_order(conn, order_id).await?;
                        service::create_compensation_commands(conn, &order, &reason).await?;
                        service::mark_saga_compensating(conn, order_id, &reason).await?;
                        Ok(())
                    })
                })
                .await;

            match outcome {
                Ok(()) => {
                    warn!("compensation triggered for timed out order {order_id}");
                    reaped += 1;
                }
                Err(e) => error!("failed to reap saga for order {order_id}: {e}"),
            }
        }

        Ok(reaped)
    }
}
