//! Gatehouse HTTP Server - remote authorization decisions
//!
//! Exposes the gatekeeper over HTTP so services outside the process can ask
//! whether an actor may reach a declared target.

pub mod api;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

pub use api::{AuthorizeRequest, AuthorizeResponse, HealthResponse};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Routes served by the binary
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/authorize", post(handlers::authorize))
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
