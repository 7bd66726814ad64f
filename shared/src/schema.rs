// Tables present in every service database.

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_type -> Varchar,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        payload -> Jsonb,
        correlation_id -> Nullable<Varchar>,
        causation_id -> Nullable<Varchar>,
        idempotency_key -> Nullable<Varchar>,
        published -> Bool,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    idempotency_store (consumer_id, event_id) {
        consumer_id -> Varchar,
        event_id -> Uuid,
        processed_at -> Timestamptz,
    }
}
