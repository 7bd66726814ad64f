diesel::table! {
    inventory (id) {
        id -> Uuid,
        product_id -> Uuid,
        variant_id -> Uuid,
        sku -> Varchar,
        total_quantity -> Int4,
        reserved_quantity -> Int4,
        version -> Int4,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_reservations (id) {
        id -> Uuid,
        order_id -> Uuid,
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    inventory_reservation_items (id) {
        id -> Uuid,
        reservation_id -> Uuid,
        inventory_id -> Uuid,
        quantity -> Int4,
    }
}

diesel::joinable!(inventory_reservation_items -> inventory_reservations (reservation_id));
diesel::joinable!(inventory_reservation_items -> inventory (inventory_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory,
    inventory_reservations,
    inventory_reservation_items,
);
