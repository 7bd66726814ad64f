//! Typed payloads for the commands exchanged between the services.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveInventoryItem {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveInventoryCommand {
    pub order_id: Uuid,
    pub items: Vec<ReserveInventoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInventoryCommand {
    pub order_id: Uuid,
    #[serde(default)]
    pub reservation_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInventoryReservationCommand {
    pub order_id: Uuid,
    #[serde(default)]
    pub reservation_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePaymentCommand {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i32,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturePaymentCommand {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    #[serde(default)]
    pub capture_amount: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoidPaymentCommand {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPaymentCommand {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    #[serde(default)]
    pub refund_amount: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_command_uses_camel_case_on_the_wire() {
        let cmd = ReserveInventoryCommand {
            order_id: Uuid::nil(),
            items: vec![ReserveInventoryItem {
                product_id: Some(Uuid::nil()),
                variant_id: Some(Uuid::nil()),
                sku: None,
                quantity: 2,
            }],
        };

        let value = serde_json::to_value(&cmd).unwrap();
        assert!(value.get("orderId").is_some());
        assert!(value["items"][0].get("productId").is_some());
        assert!(value["items"][0].get("variantId").is_some());
    }

    #[test]
    fn optional_command_fields_may_be_absent() {
        let cmd: CommitInventoryCommand = serde_json::from_str(
            r#"{"orderId": "00000000-0000-0000-0000-000000000001"}"#,
        )
        .unwrap();
        assert!(cmd.reservation_id.is_none());

        let cmd: RefundPaymentCommand = serde_json::from_str(
            r#"{
                "orderId": "00000000-0000-0000-0000-000000000001",
                "paymentId": "00000000-0000-0000-0000-000000000002"
            }"#,
        )
        .unwrap();
        assert!(cmd.refund_amount.is_none());
        assert!(cmd.reason.is_none());
    }
}
