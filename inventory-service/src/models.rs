use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// ACTIVE is the only non-terminal reservation state; the terminal state is
/// set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Active,
    Committed,
    Cancelled,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Committed => "COMMITTED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::inventory)]
pub struct Inventory {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub sku: String,
    pub total_quantity: i32,
    pub reserved_quantity: i32,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl Inventory {
    pub fn available(&self) -> i32 {
        self.total_quantity - self.reserved_quantity
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::inventory_reservations)]
pub struct InventoryReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Insertable)]
#[diesel(table_name = crate::schema::inventory_reservation_items)]
pub struct InventoryReservationItem {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub inventory_id: Uuid,
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_total_minus_reserved() {
        let inventory = Inventory {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: "SKU-1".to_owned(),
            total_quantity: 10,
            reserved_quantity: 3,
            version: 0,
            updated_at: Utc::now(),
        };
        assert_eq!(inventory.available(), 7);
    }
}
