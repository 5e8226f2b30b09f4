use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/:id", get(get_reservation))
        .route("/reservations/:id/release", post(release_reservation))
        .route("/reservations/:id/commit", post(commit_reservation))
}

pub async fn create_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ReserveRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rej) => return errors::json_rejection(rej),
    };
    let product_id = match errors::parse_product_id(body.product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let quantity = match errors::required(body.quantity, "quantity") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .manager()
        .reserve(&product_id, quantity, body.ttl_seconds)
        .await
    {
        Ok(r) => (StatusCode::CREATED, Json(dto::ReservationView::from(&r))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id = match errors::parse_reservation_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.manager().get_reservation(reservation_id).await {
        Ok(r) => (StatusCode::OK, Json(dto::ReservationView::from(&r))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// Idempotent: releasing a resolved reservation answers 200 with its status.
pub async fn release_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id = match errors::parse_reservation_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.manager().release(reservation_id).await {
        Ok(r) => (StatusCode::OK, Json(dto::ReservationStatusView::from(&r))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

pub async fn commit_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let reservation_id = match errors::parse_reservation_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.manager().commit(reservation_id).await {
        Ok(r) => (StatusCode::OK, Json(dto::ReservationStatusView::from(&r))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
