//! Payment command consumer.

use anyhow::Result;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::{error, info, warn};

use shared::commands::{
    AuthorizePaymentCommand, CapturePaymentCommand, RefundPaymentCommand, VoidPaymentCommand,
};
use shared::{idempotency, outbox, DomainError, DomainResult, Envelope, MessageContext};

use crate::gateway::MockPaymentGateway;
use crate::ledger::{self, EventDraft};

type DbPool = Pool<AsyncPgConnection>;

const CONSUMER_ID: &str = "payment-service";
const PRODUCER: &str = "payment-service";
const AGGREGATE_TYPE: &str = "PAYMENT";

pub struct CommandHandler {
    pool: DbPool,
    gateway: MockPaymentGateway,
}

impl CommandHandler {
    pub fn new(pool: DbPool, gateway: MockPaymentGateway) -> Self {
        Self { pool, gateway }
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

        let gateway = self.gateway.clone();
        let mut conn = self.pool.get().await?;
        conn.transaction::<_, DomainError, _>(move |conn| {
            Box::pin(async move {
                if idempotency::is_processed(conn, CONSUMER_ID, envelope.meta.event_id).await? {
                    info!("skipping duplicate command {}", envelope.meta.event_id);
                    return Ok(());
                }

                match handle_command(conn, &gateway, &envelope).await {
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
    gateway: &MockPaymentGateway,
    envelope: &Envelope,
) -> DomainResult<Option<EventDraft>> {
    match envelope.meta.event_type.as_str() {
        "AuthorizePaymentCommand" => {
            let command: AuthorizePaymentCommand = serde_json::from_value(envelope.data.clone())?;
            let idempotency_key = envelope
                .meta
                .idempotency_key
                .clone()
                .unwrap_or_else(|| envelope.meta.event_id.to_string());
            let gateway = gateway.clone();
            let event = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move {
                        ledger::handle_authorize(conn, &gateway, &command, idempotency_key).await
                    })
                })
                .await?;
            Ok(Some(event))
        }
        "CapturePaymentCommand" => {
            let command: CapturePaymentCommand = serde_json::from_value(envelope.data.clone())?;
            let event = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move { ledger::handle_capture(conn, &command).await })
                })
                .await?;
            Ok(Some(event))
        }
        "VoidPaymentCommand" => {
            let command: VoidPaymentCommand = serde_json::from_value(envelope.data.clone())?;
            let event = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move { ledger::handle_void(conn, &command).await })
                })
                .await?;
            Ok(Some(event))
        }
        "RefundPaymentCommand" => {
            let command: RefundPaymentCommand = serde_json::from_value(envelope.data.clone())?;
            let event = conn
                .transaction::<_, DomainError, _>(move |conn| {
                    Box::pin(async move { ledger::handle_refund(conn, &command).await })
                })
                .await?;
            Ok(Some(event))
        }
        other => {
            warn!("unsupported payment command type: {other}");
            Ok(None)
        }
    }
}
