//! Stock accounting. All quantity changes go through a bounded
//! read-compare-swap loop on the row version; a version conflict gets a
//! fresh read, insufficient stock and underflow are business outcomes and
//! are never retried.

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use shared::commands::{
    CancelInventoryReservationCommand, CommitInventoryCommand, ReserveInventoryCommand,
    ReserveInventoryItem,
};
use shared::events::ReservedItem;
use shared::{DomainError, DomainResult};

use crate::models::{Inventory, InventoryReservation, InventoryReservationItem, ReservationStatus};
use crate::schema::{inventory, inventory_reservation_items, inventory_reservations};

const MAX_OPTIMISTIC_RETRIES: usize = 5;

#[derive(Debug, Clone)]
pub struct ReservationWithItems {
    pub reservation: InventoryReservation,
    pub items: Vec<(InventoryReservationItem, Inventory)>,
}

impl ReservationWithItems {
    /// Event-payload view of the reserved rows.
    pub fn reserved_items(&self) -> Vec<ReservedItem> {
        self.items
            .iter()
            .map(|(item, inventory)| ReservedItem {
                inventory_id: inventory.id,
                product_id: inventory.product_id,
                variant_id: inventory.variant_id,
                sku: inventory.sku.clone(),
                quantity: item.quantity,
            })
            .collect()
    }
}

pub async fn resolve_inventory(
    conn: &mut AsyncPgConnection,
    item: &ReserveInventoryItem,
) -> DomainResult<Inventory> {
    if let Some(sku) = item.sku.as_deref().filter(|sku| !sku.is_empty()) {
        return inventory::table
            .filter(inventory::sku.eq(sku))
            .first::<Inventory>(conn)
            .await
            .optional()?
            .ok_or_else(|| DomainError::NotFound(format!("inventory for sku {sku}")));
    }

    let (Some(product_id), Some(variant_id)) = (item.product_id, item.variant_id) else {
        return Err(DomainError::Validation(
            "each reserve item needs a sku or productId+variantId".to_owned(),
        ));
    };

    inventory::table
        .filter(inventory::product_id.eq(product_id))
        .filter(inventory::variant_id.eq(variant_id))
        .first::<Inventory>(conn)
        .await
        .optional()?
        .ok_or_else(|| {
            DomainError::NotFound(format!(
                "inventory for productId={product_id}, variantId={variant_id}"
            ))
        })
}

/// Creates an ACTIVE reservation and increments `reserved` on every touched
/// inventory row. Fails as a whole if any item cannot be satisfied; the
/// caller's transaction rolls the partial work back.
pub async fn reserve(
    conn: &mut AsyncPgConnection,
    command: &ReserveInventoryCommand,
    ttl_minutes: i64,
) -> DomainResult<ReservationWithItems> {
    if command.items.is_empty() {
        return Err(DomainError::Validation(
            "reserve command needs at least one item".to_owned(),
        ));
    }

    let now = Utc::now();
    let reservation = InventoryReservation {
        id: Uuid::new_v4(),
        order_id: command.order_id,
        status: ReservationStatus::Active.as_str().to_owned(),
        expires_at: now + Duration::minutes(ttl_minutes),
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(inventory_reservations::table)
        .values(&reservation)
        .execute(conn)
        .await?;

    let mut items = Vec::with_capacity(command.items.len());
    for item in &command.items {
        let inventory = resolve_inventory(conn, item).await?;
        let inventory = reserve_stock(conn, inventory.id, item.quantity).await?;

        let row = InventoryReservationItem {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            inventory_id: inventory.id,
            quantity: item.quantity,
        };
        diesel::insert_into(inventory_reservation_items::table)
            .values(&row)
            .execute(conn)
            .await?;
        items.push((row, inventory));
    }

    Ok(ReservationWithItems { reservation, items })
}

/// Consumes the reserved stock permanently: decrements both `reserved` and
/// `total` for every reservation item.
pub async fn commit(
    conn: &mut AsyncPgConnection,
    command: &CommitInventoryCommand,
) -> DomainResult<ReservationWithItems> {
    let mut reservation =
        find_active_reservation(conn, command.order_id, command.reservation_id).await?;
    claim_terminal_status(conn, &mut reservation, ReservationStatus::Committed).await?;

    let items = load_reservation_items(conn, reservation.id).await?;
    for (item, _) in &items {
        commit_stock(conn, item.inventory_id, item.quantity).await?;
    }

    Ok(ReservationWithItems { reservation, items })
}

/// Returns the reserved stock to the available pool.
pub async fn cancel(
    conn: &mut AsyncPgConnection,
    command: &CancelInventoryReservationCommand,
) -> DomainResult<ReservationWithItems> {
    let mut reservation =
        find_active_reservation(conn, command.order_id, command.reservation_id).await?;
    claim_terminal_status(conn, &mut reservation, ReservationStatus::Cancelled).await?;

    let items = load_reservation_items(conn, reservation.id).await?;
    for (item, _) in &items {
        release_stock(conn, item.inventory_id, item.quantity).await?;
    }

    Ok(ReservationWithItems { reservation, items })
}

pub async fn find_expired(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
) -> DomainResult<Vec<InventoryReservation>> {
    let expired = inventory_reservations::table
        .filter(inventory_reservations::status.eq(ReservationStatus::Active.as_str()))
        .filter(inventory_reservations::expires_at.lt(now))
        .load::<InventoryReservation>(conn)
        .await?;
    Ok(expired)
}

/// Expires a single reservation, releasing its stock. Returns `None` when
/// the reservation reached a terminal status in the meantime (a racing
/// commit or cancel won).
pub async fn expire_one(
    conn: &mut AsyncPgConnection,
    reservation_id: Uuid,
) -> DomainResult<Option<ReservationWithItems>> {
    if !try_claim_status(conn, reservation_id, ReservationStatus::Expired).await? {
        return Ok(None);
    }

    let mut reservation = inventory_reservations::table
        .find(reservation_id)
        .first::<InventoryReservation>(conn)
        .await
        .optional()?
        .ok_or_else(|| DomainError::NotFound(format!("reservation {reservation_id}")))?;
    reservation.status = ReservationStatus::Expired.as_str().to_owned();

    let items = load_reservation_items(conn, reservation_id).await?;
    for (item, _) in &items {
        release_stock(conn, item.inventory_id, item.quantity).await?;
    }

    Ok(Some(ReservationWithItems { reservation, items }))
}

fn checked_reserve(inventory: &Inventory, quantity: i32) -> DomainResult<i32> {
    if quantity <= 0 {
        return Err(DomainError::Validation(
            "reservation quantity must be positive".to_owned(),
        ));
    }
    if inventory.available() < quantity {
        return Err(DomainError::InsufficientStock(format!(
            "sku {} has {} available, requested {quantity}",
            inventory.sku,
            inventory.available()
        )));
    }
    Ok(inventory.reserved_quantity + quantity)
}

fn checked_commit(inventory: &Inventory, quantity: i32) -> DomainResult<(i32, i32)> {
    if inventory.reserved_quantity < quantity || inventory.total_quantity < quantity {
        return Err(DomainError::Conflict(format!(
            "quantity underflow committing {quantity} on sku {}",
            inventory.sku
        )));
    }
    Ok((
        inventory.total_quantity - quantity,
        inventory.reserved_quantity - quantity,
    ))
}

fn checked_release(inventory: &Inventory, quantity: i32) -> DomainResult<i32> {
    if inventory.reserved_quantity < quantity {
        return Err(DomainError::Conflict(format!(
            "reserved quantity underflow releasing {quantity} on sku {}",
            inventory.sku
        )));
    }
    Ok(inventory.reserved_quantity - quantity)
}

async fn reserve_stock(
    conn: &mut AsyncPgConnection,
    inventory_id: Uuid,
    quantity: i32,
) -> DomainResult<Inventory> {
    for _ in 0..MAX_OPTIMISTIC_RETRIES {
        let mut row = find_inventory(conn, inventory_id).await?;
        let new_reserved = checked_reserve(&row, quantity)?;
        if write_quantities(conn, &row, row.total_quantity, new_reserved).await? {
            row.reserved_quantity = new_reserved;
            row.version += 1;
            return Ok(row);
        }
    }
    Err(DomainError::OptimisticLock(format!(
        "inventory {inventory_id} while reserving"
    )))
}

async fn commit_stock(
    conn: &mut AsyncPgConnection,
    inventory_id: Uuid,
    quantity: i32,
) -> DomainResult<()> {
    for _ in 0..MAX_OPTIMISTIC_RETRIES {
        let row = find_inventory(conn, inventory_id).await?;
        let (new_total, new_reserved) = checked_commit(&row, quantity)?;
        if write_quantities(conn, &row, new_total, new_reserved).await? {
            return Ok(());
        }
    }
    Err(DomainError::OptimisticLock(format!(
        "inventory {inventory_id} while committing"
    )))
}

async fn release_stock(
    conn: &mut AsyncPgConnection,
    inventory_id: Uuid,
    quantity: i32,
) -> DomainResult<()> {
    for _ in 0..MAX_OPTIMISTIC_RETRIES {
        let row = find_inventory(conn, inventory_id).await?;
        let new_reserved = checked_release(&row, quantity)?;
        if write_quantities(conn, &row, row.total_quantity, new_reserved).await? {
            return Ok(());
        }
    }
    Err(DomainError::OptimisticLock(format!(
        "inventory {inventory_id} while releasing"
    )))
}

async fn find_inventory(conn: &mut AsyncPgConnection, inventory_id: Uuid) -> DomainResult<Inventory> {
    inventory::table
        .find(inventory_id)
        .first::<Inventory>(conn)
        .await
        .optional()?
        .ok_or_else(|| DomainError::NotFound(format!("inventory {inventory_id}")))
}

/// Single version-checked write; returns false on a lost version race.
async fn write_quantities(
    conn: &mut AsyncPgConnection,
    row: &Inventory,
    new_total: i32,
    new_reserved: i32,
) -> DomainResult<bool> {
    let updated = diesel::update(
        inventory::table
            .filter(inventory::id.eq(row.id))
            .filter(inventory::version.eq(row.version)),
    )
    .set((
        inventory::total_quantity.eq(new_total),
        inventory::reserved_quantity.eq(new_reserved),
        inventory::version.eq(row.version + 1),
        inventory::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;

    Ok(updated == 1)
}

async fn find_active_reservation(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    reservation_id: Option<Uuid>,
) -> DomainResult<InventoryReservation> {
    let active = ReservationStatus::Active.as_str();

    if let Some(reservation_id) = reservation_id {
        return inventory_reservations::table
            .find(reservation_id)
            .filter(inventory_reservations::status.eq(active))
            .first::<InventoryReservation>(conn)
            .await
            .optional()?
            .ok_or_else(|| {
                DomainError::Conflict(format!("active reservation not found: {reservation_id}"))
            });
    }

    inventory_reservations::table
        .filter(inventory_reservations::order_id.eq(order_id))
        .filter(inventory_reservations::status.eq(active))
        .first::<InventoryReservation>(conn)
        .await
        .optional()?
        .ok_or_else(|| {
            DomainError::Conflict(format!("active reservation not found for order {order_id}"))
        })
}

async fn load_reservation_items(
    conn: &mut AsyncPgConnection,
    reservation_id: Uuid,
) -> DomainResult<Vec<(InventoryReservationItem, Inventory)>> {
    let items = inventory_reservation_items::table
        .filter(inventory_reservation_items::reservation_id.eq(reservation_id))
        .inner_join(inventory::table)
        .load::<(InventoryReservationItem, Inventory)>(conn)
        .await?;
    Ok(items)
}

/// Terminal statuses are set exactly once: the transition is claimed with a
/// status predicate and loses cleanly to a racing writer.
async fn try_claim_status(
    conn: &mut AsyncPgConnection,
    reservation_id: Uuid,
    target: ReservationStatus,
) -> DomainResult<bool> {
    let updated = diesel::update(
        inventory_reservations::table
            .filter(inventory_reservations::id.eq(reservation_id))
            .filter(inventory_reservations::status.eq(ReservationStatus::Active.as_str())),
    )
    .set((
        inventory_reservations::status.eq(target.as_str()),
        inventory_reservations::updated_at.eq(Utc::now()),
    ))
    .execute(conn)
    .await?;

    Ok(updated == 1)
}

async fn claim_terminal_status(
    conn: &mut AsyncPgConnection,
    reservation: &mut InventoryReservation,
    target: ReservationStatus,
) -> DomainResult<()> {
    if !try_claim_status(conn, reservation.id, target).await? {
        return Err(DomainError::Conflict(format!(
            "reservation {} is no longer active",
            reservation.id
        )));
    }
    reservation.status = target.as_str().to_owned();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(total: i32, reserved: i32) -> Inventory {
        Inventory {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            sku: "SKU-1".to_owned(),
            total_quantity: total,
            reserved_quantity: reserved,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn reserving_within_available_stock_succeeds() {
        assert_eq!(checked_reserve(&stock(10, 0), 5).unwrap(), 5);
        assert_eq!(checked_reserve(&stock(10, 5), 5).unwrap(), 10);
    }

    #[test]
    fn reserving_past_available_stock_is_insufficient_not_a_race() {
        // total 10, reserved 5: a request for 6 must fail no matter how the
        // version race between the two reservers resolves.
        assert!(matches!(
            checked_reserve(&stock(10, 5), 6),
            Err(DomainError::InsufficientStock(_))
        ));
    }

    #[test]
    fn reserve_quantity_must_be_positive() {
        assert!(matches!(
            checked_reserve(&stock(10, 0), 0),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            checked_reserve(&stock(10, 0), -1),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn committing_consumes_both_total_and_reserved() {
        assert_eq!(checked_commit(&stock(10, 5), 5).unwrap(), (5, 0));
    }

    #[test]
    fn committing_more_than_reserved_underflows() {
        assert!(matches!(
            checked_commit(&stock(10, 2), 5),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn releasing_returns_stock_to_the_pool() {
        assert_eq!(checked_release(&stock(10, 5), 5).unwrap(), 0);
    }

    #[test]
    fn releasing_more_than_reserved_underflows() {
        assert!(matches!(
            checked_release(&stock(10, 1), 2),
            Err(DomainError::Conflict(_))
        ));
    }
}
