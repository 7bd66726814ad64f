diesel::table! {
    payments (id) {
        id -> Uuid,
        order_id -> Uuid,
        user_id -> Uuid,
        amount -> Int4,
        currency -> Varchar,
        payment_method -> Varchar,
        status -> Varchar,
        authorization_code -> Nullable<Varchar>,
        failure_reason -> Nullable<Varchar>,
        idempotency_key -> Nullable<Varchar>,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    refunds (id) {
        id -> Uuid,
        payment_id -> Uuid,
        order_id -> Uuid,
        amount -> Int4,
        reason -> Nullable<Varchar>,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(refunds -> payments (payment_id));

diesel::allow_tables_to_appear_in_same_query!(payments, refunds);
