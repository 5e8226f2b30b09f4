//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and the shared reservation manager
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use stockhold_infra::{AppConfig, ExpirySweeperHandle, StoreError};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// A wired application: the router plus the background sweeper it relies on.
pub struct App {
    pub router: Router,
    pub sweeper: ExpirySweeperHandle,
    /// `"in_memory"` or `"postgres"`.
    pub backend: &'static str,
}

/// Build services from `config`, start the expiry sweeper and assemble the
/// router (public entrypoint used by `main.rs`).
///
/// Must be called inside a tokio runtime.
pub async fn build_app(config: &AppConfig) -> Result<App, StoreError> {
    let services = Arc::new(AppServices::from_config(config).await?);
    let sweeper = config.sweeper().spawn(services.manager().clone());

    Ok(App {
        backend: services.backend(),
        router: router(services),
        sweeper,
    })
}

/// The full HTTP router over already-built services.
pub fn router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
