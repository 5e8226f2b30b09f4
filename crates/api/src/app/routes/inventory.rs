use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::{JsonRejection, QueryRejection}},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use stockhold_core::ProductId;
use stockhold_inventory::StockLevels;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/stock", get(get_stock))
        .route("/products", post(register_product))
        .route("/products/:id/restock", post(restock))
        .route("/sweep", post(sweep))
}

fn stock_view(product_id: &ProductId, levels: StockLevels) -> dto::StockView {
    dto::StockView {
        product_id: product_id.to_string(),
        levels,
    }
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    query: Result<Query<dto::StockQuery>, QueryRejection>,
) -> axum::response::Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rej) => return errors::query_rejection(rej),
    };
    let product_id = match errors::parse_product_id(query.product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.manager().get_stock(&product_id).await {
        Ok(levels) => (StatusCode::OK, Json(stock_view(&product_id, levels))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::RegisterProductRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rej) => return errors::json_rejection(rej),
    };
    let product_id = match errors::parse_product_id(body.product_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let total_stock = match errors::required(body.total_stock, "totalStock") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services
        .manager()
        .register_product(product_id.clone(), total_stock)
        .await
    {
        Ok(levels) => (StatusCode::CREATED, Json(stock_view(&product_id, levels))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

pub async fn restock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::RestockRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rej) => return errors::json_rejection(rej),
    };
    let product_id = match errors::parse_product_id(Some(id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let quantity = match errors::required(body.quantity, "quantity") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.manager().restock(&product_id, quantity).await {
        Ok(levels) => (StatusCode::OK, Json(stock_view(&product_id, levels))).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}

/// Run an expiry sweep now and report what it did.
pub async fn sweep(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.manager().sweep_expired().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::reservation_error_to_response(e),
    }
}
