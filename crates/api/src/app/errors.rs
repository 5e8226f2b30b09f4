use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use stockhold_core::{ProductId, ReservationId};
use stockhold_infra::ReservationError;

pub fn reservation_error_to_response(err: ReservationError) -> Response {
    let status = match &err {
        ReservationError::Validation(_) => StatusCode::BAD_REQUEST,
        ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InsufficientStock { .. }
        | ReservationError::InvalidState(_)
        | ReservationError::Conflict(_) => StatusCode::CONFLICT,
        ReservationError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    match err {
        ReservationError::InsufficientStock {
            requested,
            available,
        } => (
            status,
            Json(json!({
                "error": err.kind(),
                "message": err.to_string(),
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        ReservationError::StoreUnavailable(ref e) => {
            warn!(error = %e, "stock store unavailable");
            json_error(status, err.kind(), err.to_string())
        }
        _ => json_error(status, err.kind(), err.to_string()),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error(message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn json_rejection(rejection: JsonRejection) -> Response {
    validation_error(rejection.body_text())
}

pub fn query_rejection(rejection: QueryRejection) -> Response {
    validation_error(rejection.body_text())
}

/// A required field, or a 400 naming it.
pub fn required<T>(value: Option<T>, field: &str) -> Result<T, Response> {
    value.ok_or_else(|| validation_error(format!("{field} is required")))
}

pub fn parse_product_id(raw: Option<String>) -> Result<ProductId, Response> {
    let raw = required(raw, "productId")?;
    ProductId::parse(raw).map_err(|e| reservation_error_to_response(e.into()))
}

pub fn parse_reservation_id(raw: &str) -> Result<ReservationId, Response> {
    raw.parse()
        .map_err(|_| validation_error(format!("'{raw}' is not a valid reservation id")))
}
