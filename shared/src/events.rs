//! Typed payloads for the domain events the services publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedItem {
    pub inventory_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub sku: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservedData {
    pub reservation_id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<ReservedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservationFailedData {
    pub order_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryCommittedData {
    pub reservation_id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub items: Vec<ReservedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservationCancelledData {
    pub reservation_id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorizedData {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub amount: i32,
    pub authorization_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorizationFailedData {
    pub order_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub reason: String,
    pub error_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCapturedData {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub amount: i32,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVoidedData {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub reason: Option<String>,
    pub voided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRefundedData {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub refund_id: Uuid,
    pub amount: i32,
    pub reason: Option<String>,
    pub refunded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelledData {
    pub order_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailedData {
    pub order_id: Uuid,
    pub reason: String,
    pub failed_step: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmedData {
    pub order_id: Uuid,
    pub confirmed_at: DateTime<Utc>,
}
