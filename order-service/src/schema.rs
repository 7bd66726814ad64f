diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        status -> Varchar,
        saga_status -> Varchar,
        total_amount -> Int4,
        currency -> Varchar,
        reservation_id -> Nullable<Uuid>,
        payment_id -> Nullable<Uuid>,
        idempotency_key -> Nullable<Varchar>,
        failure_reason -> Nullable<Varchar>,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        variant_id -> Uuid,
        sku -> Nullable<Varchar>,
        product_name -> Varchar,
        quantity -> Int4,
        unit_price -> Int4,
    }
}

diesel::table! {
    saga_state (id) {
        id -> Uuid,
        order_id -> Uuid,
        current_step -> Varchar,
        status -> Varchar,
        started_at -> Timestamptz,
        updated_at -> Timestamptz,
        timeout_at -> Timestamptz,
        retry_count -> Int4,
        context -> Jsonb,
    }
}

diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(orders, order_items, saga_state);
