//! HTTP request handlers

use crate::api::{AuthorizeRequest, AuthorizeResponse, HealthResponse, HealthStatus};
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use gatehouse_core::{AuthorizationRequest, TargetRef};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Query parameters for debug mode
#[derive(Debug, Deserialize)]
pub struct DebugParams {
    #[serde(default)]
    debug: bool,
}

/// Handle authorization request
///
/// Allowed requests answer 200, denied ones 403 with the same body.
pub async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<DebugParams>,
    Json(req): Json<AuthorizeRequest>,
) -> ApiResult<(StatusCode, Json<AuthorizeResponse>)> {
    let start = Instant::now();

    debug!("Authorization request: {:?}", req);

    let target: TargetRef = req
        .target
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid target: {}", e)))?;

    let info = req.request_info();
    let kind = state.gatekeeper.classifier().classify(&info);
    let request = AuthorizationRequest::new(target, req.actor(), info);

    let evaluation = state.gatekeeper.authorize(&request).map_err(|e| {
        metrics::record_error(error_type(&e));
        ApiError::from(e)
    })?;

    let elapsed = start.elapsed().as_secs_f64();
    let response = AuthorizeResponse::from_evaluation(&evaluation, kind, state.debug || params.debug);
    let reason = response.reason.map(|r| r.to_string());

    metrics::record_authorization(
        if reason.is_some() { "deny" } else { "allow" },
        reason.as_deref(),
        evaluation.outcomes.len(),
        elapsed,
    );

    info!(
        "Authorization: {} actor={} {} -> {:?} ({:.2}ms)",
        req.target,
        req.actor.id,
        kind,
        response.decision,
        elapsed * 1000.0
    );

    let status = if evaluation.decision.is_allowed() {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };

    Ok((status, Json(response)))
}

fn error_type(error: &gatehouse_core::GatehouseError) -> &'static str {
    use gatehouse_core::GatehouseError::*;

    match error {
        TargetNotFound(_) => "target_not_found",
        StoreUnavailable(_) => "store_unavailable",
        PermissionNotFound(_) | RoleNotFound(_) => "rbac",
        _ => "internal",
    }
}

fn health(state: &AppState, status: HealthStatus, registered_types: usize) -> HealthResponse {
    HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        registered_types,
        backend: state.gatekeeper.rbac().backend_name().to_string(),
    }
}

/// Health check - liveness probe
pub async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    let types = state.gatekeeper.registry().map(|r| r.len()).unwrap_or(0);
    Json(health(&state, HealthStatus::Healthy, types))
}

/// Health check - readiness probe
///
/// Ready once the registry loads and storage is serving.
pub async fn health_ready(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let registry = state.gatekeeper.registry().map_err(|e| {
        warn!("Readiness check failed: {}", e);
        ApiError::ServiceUnavailable(format!("Descriptors not loaded: {}", e))
    })?;

    if !state.gatekeeper.is_ready() {
        warn!("Readiness check failed: storage unavailable");
        return Err(ApiError::ServiceUnavailable("Storage unavailable".to_string()));
    }

    metrics::update_registry_metrics(registry.len());
    Ok(Json(health(&state, HealthStatus::Healthy, registry.len())))
}

/// Prometheus metrics endpoint
pub async fn metrics() -> String {
    metrics::get_prometheus_metrics()
}
