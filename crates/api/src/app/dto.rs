use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_inventory::{Reservation, ReservationStatus, StockLevels};

// -------------------------
// Request DTOs
// -------------------------
//
// Fields are optional so that a missing field is reported as a
// `validation_error` naming the field instead of a generic decode failure.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveRequest {
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
    pub ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterProductRequest {
    pub product_id: Option<String>,
    pub total_stock: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuery {
    pub product_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub reservation_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            reservation_id: r.id.to_string(),
            product_id: r.product_id.to_string(),
            quantity: r.quantity,
            status: r.status,
            created_at: r.created_at,
            expires_at: r.expires_at,
            resolved_at: r.resolved_at,
        }
    }
}

/// Outcome of release/commit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationStatusView {
    pub reservation_id: String,
    pub status: ReservationStatus,
}

impl From<&Reservation> for ReservationStatusView {
    fn from(r: &Reservation) -> Self {
        Self {
            reservation_id: r.id.to_string(),
            status: r.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockView {
    pub product_id: String,
    #[serde(flatten)]
    pub levels: StockLevels,
}
