use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.check_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "store": services.backend() })),
        )
            .into_response(),
        Err(e) => errors::reservation_error_to_response(e.into()),
    }
}
