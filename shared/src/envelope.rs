//! Wire format shared by every command and event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};

/// Producers write an integer version; older envelopes in the wild carry a
/// string, so consumers accept both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaVersion {
    Int(i32),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    pub event_type: String,
    #[serde(default)]
    pub schema_version: Option<SchemaVersion>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EventMeta,
    pub data: serde_json::Value,
}

/// Correlation/causation/idempotency propagation for an outgoing message.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl MessageContext {
    /// Context for a message that starts a new causal chain on an aggregate.
    pub fn for_aggregate(aggregate_id: Uuid, idempotency_key: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(aggregate_id.to_string()),
            causation_id: None,
            idempotency_key: Some(idempotency_key.into()),
        }
    }

    /// Context for a message caused by `meta`. The correlation id is carried
    /// forward, falling back to the aggregate id when the inbound message
    /// did not set one.
    pub fn reply_to(meta: &EventMeta, fallback_aggregate: Uuid) -> Self {
        Self {
            correlation_id: meta
                .correlation_id
                .clone()
                .or_else(|| Some(fallback_aggregate.to_string())),
            causation_id: Some(meta.event_id.to_string()),
            idempotency_key: meta.idempotency_key.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    meta: Option<RawMeta>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeta {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    schema_version: Option<SchemaVersion>,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    producer: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    causation_id: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

impl Envelope {
    pub fn new(event_type: &str, producer: &str, data: serde_json::Value, ctx: &MessageContext) -> Self {
        Self {
            meta: EventMeta {
                event_id: Uuid::new_v4(),
                event_type: event_type.to_owned(),
                schema_version: Some(SchemaVersion::Int(1)),
                occurred_at: Some(Utc::now()),
                producer: Some(producer.to_owned()),
                correlation_id: ctx.correlation_id.clone(),
                causation_id: ctx.causation_id.clone(),
                idempotency_key: ctx.idempotency_key.clone(),
            },
            data,
        }
    }

    /// Parses and validates an inbound payload. Envelopes without a usable
    /// `eventId` or `eventType` are rejected; callers drop those without
    /// retry.
    pub fn decode(payload: &str) -> DomainResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(payload)?;
        let meta = raw
            .meta
            .ok_or_else(|| DomainError::Validation("envelope has no meta".to_owned()))?;

        let event_type = meta
            .event_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DomainError::Validation("envelope meta has no eventType".to_owned()))?;
        let event_id = meta
            .event_id
            .ok_or_else(|| DomainError::Validation("envelope meta has no eventId".to_owned()))?;
        let event_id = event_id
            .parse::<Uuid>()
            .map_err(|_| DomainError::Validation(format!("invalid eventId: {event_id}")))?;

        Ok(Self {
            meta: EventMeta {
                event_id,
                event_type,
                schema_version: meta.schema_version,
                occurred_at: meta.occurred_at,
                producer: meta.producer,
                correlation_id: meta.correlation_id,
                causation_id: meta.causation_id,
                idempotency_key: meta.idempotency_key,
            },
            data: raw.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_envelope() {
        let payload = r#"{
            "meta": {
                "eventId": "7b7f84b6-7a44-44ad-bf1c-e0f8f62f8f11",
                "eventType": "InventoryReserved",
                "schemaVersion": 1,
                "occurredAt": "2025-07-14T09:30:00Z",
                "producer": "inventory-service",
                "correlationId": "order-1",
                "causationId": null,
                "idempotencyKey": "approve-order-1"
            },
            "data": {"orderId": "00000000-0000-0000-0000-000000000001"}
        }"#;

        let envelope = Envelope::decode(payload).unwrap();
        assert_eq!(envelope.meta.event_type, "InventoryReserved");
        assert_eq!(envelope.meta.schema_version, Some(SchemaVersion::Int(1)));
        assert_eq!(envelope.meta.correlation_id.as_deref(), Some("order-1"));
        assert!(envelope.data.get("orderId").is_some());
    }

    #[test]
    fn accepts_string_schema_versions() {
        let payload = r#"{
            "meta": {
                "eventId": "7b7f84b6-7a44-44ad-bf1c-e0f8f62f8f11",
                "eventType": "PaymentAuthorized",
                "schemaVersion": "1.0"
            },
            "data": {}
        }"#;

        let envelope = Envelope::decode(payload).unwrap();
        assert_eq!(
            envelope.meta.schema_version,
            Some(SchemaVersion::Text("1.0".to_owned()))
        );
    }

    #[test]
    fn rejects_missing_event_id() {
        let payload = r#"{"meta": {"eventType": "PaymentAuthorized"}, "data": {}}"#;
        assert!(matches!(
            Envelope::decode(payload),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_missing_event_type() {
        let payload =
            r#"{"meta": {"eventId": "7b7f84b6-7a44-44ad-bf1c-e0f8f62f8f11"}, "data": {}}"#;
        assert!(matches!(
            Envelope::decode(payload),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(DomainError::Serialization(_))
        ));
    }

    #[test]
    fn reply_context_falls_back_to_the_aggregate_id() {
        let order_id = Uuid::new_v4();
        let ctx = MessageContext::for_aggregate(order_id, "approve-1");
        let envelope = Envelope::new("ReserveInventoryCommand", "order-service", serde_json::json!({}), &ctx);

        let mut meta = envelope.meta.clone();
        meta.correlation_id = None;
        let reply = MessageContext::reply_to(&meta, order_id);
        assert_eq!(reply.correlation_id, Some(order_id.to_string()));
        assert_eq!(reply.causation_id, Some(meta.event_id.to_string()));
        assert_eq!(reply.idempotency_key.as_deref(), Some("approve-1"));
    }
}
