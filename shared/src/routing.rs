//! Static event-type to topic routing.

pub const ORDER_EVENTS_TOPIC: &str = "order-events";
pub const ORDER_COMMANDS_TOPIC: &str = "order-commands";
pub const INVENTORY_COMMANDS_TOPIC: &str = "inventory-commands";
pub const INVENTORY_EVENTS_TOPIC: &str = "inventory-events";
pub const PAYMENT_COMMANDS_TOPIC: &str = "payment-commands";
pub const PAYMENT_EVENTS_TOPIC: &str = "payment-events";

const INVENTORY_COMMANDS: [&str; 3] = [
    "ReserveInventoryCommand",
    "CommitInventoryCommand",
    "CancelInventoryReservationCommand",
];

const PAYMENT_COMMANDS: [&str; 4] = [
    "AuthorizePaymentCommand",
    "CapturePaymentCommand",
    "VoidPaymentCommand",
    "RefundPaymentCommand",
];

const INVENTORY_EVENTS: [&str; 4] = [
    "InventoryReserved",
    "InventoryReservationFailed",
    "InventoryCommitted",
    "InventoryReservationCancelled",
];

const PAYMENT_EVENTS: [&str; 5] = [
    "PaymentAuthorized",
    "PaymentAuthorizationFailed",
    "PaymentCaptured",
    "PaymentVoided",
    "PaymentRefunded",
];

/// Routing is a pure function of the event-type name. Unknown command types
/// land on the order-commands topic, everything else on order-events.
pub fn route_event(event_type: &str) -> &'static str {
    if INVENTORY_COMMANDS.contains(&event_type) {
        return INVENTORY_COMMANDS_TOPIC;
    }
    if PAYMENT_COMMANDS.contains(&event_type) {
        return PAYMENT_COMMANDS_TOPIC;
    }
    if INVENTORY_EVENTS.contains(&event_type) {
        return INVENTORY_EVENTS_TOPIC;
    }
    if PAYMENT_EVENTS.contains(&event_type) {
        return PAYMENT_EVENTS_TOPIC;
    }
    if event_type.ends_with("Command") {
        return ORDER_COMMANDS_TOPIC;
    }
    ORDER_EVENTS_TOPIC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_commands_go_to_the_inventory_topic() {
        assert_eq!(route_event("ReserveInventoryCommand"), INVENTORY_COMMANDS_TOPIC);
        assert_eq!(route_event("CommitInventoryCommand"), INVENTORY_COMMANDS_TOPIC);
        assert_eq!(
            route_event("CancelInventoryReservationCommand"),
            INVENTORY_COMMANDS_TOPIC
        );
    }

    #[test]
    fn payment_commands_go_to_the_payment_topic() {
        assert_eq!(route_event("AuthorizePaymentCommand"), PAYMENT_COMMANDS_TOPIC);
        assert_eq!(route_event("RefundPaymentCommand"), PAYMENT_COMMANDS_TOPIC);
    }

    #[test]
    fn service_events_go_to_their_event_topics() {
        assert_eq!(route_event("InventoryReserved"), INVENTORY_EVENTS_TOPIC);
        assert_eq!(route_event("InventoryReservationCancelled"), INVENTORY_EVENTS_TOPIC);
        assert_eq!(route_event("PaymentCaptured"), PAYMENT_EVENTS_TOPIC);
        assert_eq!(route_event("PaymentRefunded"), PAYMENT_EVENTS_TOPIC);
    }

    #[test]
    fn unknown_commands_fall_back_to_order_commands() {
        assert_eq!(route_event("ShipOrderCommand"), ORDER_COMMANDS_TOPIC);
    }

    #[test]
    fn everything_else_is_an_order_event() {
        assert_eq!(route_event("OrderConfirmed"), ORDER_EVENTS_TOPIC);
        assert_eq!(route_event("OrderFailed"), ORDER_EVENTS_TOPIC);
        assert_eq!(route_event("OrderCancelled"), ORDER_EVENTS_TOPIC);
    }
}
