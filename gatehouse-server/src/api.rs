//! API request and response types

use gatehouse_core::{Actor, DenialReason, Evaluation, PrincipalId, RequestInfo, RequestKind};
use serde::{Deserialize, Serialize};

/// Authorization request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    /// Target, e.g. `UserController::update`
    pub target: String,

    /// Actor making the request
    pub actor: ActorInfo,

    /// Path of the request being authorized
    #[serde(default = "default_path")]
    pub path: String,

    /// Accept header of the request being authorized
    #[serde(default)]
    pub accept: Option<String>,

    /// Whether the request was sent as XMLHttpRequest
    #[serde(default)]
    pub ajax: bool,
}

fn default_path() -> String {
    "/".to_string()
}

/// Actor description
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorInfo {
    /// Principal id
    pub id: PrincipalId,

    /// User type, if any
    #[serde(default)]
    pub user_type: Option<String>,
}

impl AuthorizeRequest {
    /// Core actor for this request
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.actor.id,
            user_type: self.actor.user_type.clone(),
        }
    }

    /// Core request description
    pub fn request_info(&self) -> RequestInfo {
        let mut info = RequestInfo::new(self.path.clone()).with_ajax(self.ajax);
        if let Some(accept) = &self.accept {
            info = info.with_accept(accept.clone());
        }
        info
    }
}

/// Authorization response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    /// Authorization decision
    pub decision: Decision,

    /// Denial reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,

    /// Denial message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Context the request was classified as
    pub request_kind: RequestKind,

    /// Diagnostic information (only in debug mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl AuthorizeResponse {
    /// Build a response from an evaluation
    pub fn from_evaluation(evaluation: &Evaluation, request_kind: RequestKind, debug: bool) -> Self {
        let denial = evaluation.decision.denial();

        AuthorizeResponse {
            decision: if denial.is_some() {
                Decision::Deny
            } else {
                Decision::Allow
            },
            reason: denial.map(|d| d.reason),
            message: denial.map(|d| d.message.clone()),
            request_kind,
            diagnostics: debug.then(|| Diagnostics {
                evaluation_time_ms: evaluation.evaluation_time_ns as f64 / 1_000_000.0,
                rules_evaluated: evaluation.outcomes.len(),
                failed_rules: evaluation
                    .outcomes
                    .iter()
                    .filter(|o| !o.passed())
                    .map(|o| o.rule.to_string())
                    .collect(),
            }),
        }
    }
}

/// Authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// Request is allowed
    Allow,
    /// Request is denied
    Deny,
}

/// Diagnostic information for debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Time taken to evaluate (milliseconds)
    pub evaluation_time_ms: f64,

    /// Number of rules evaluated
    pub rules_evaluated: usize,

    /// Rules that denied
    #[serde(default)]
    pub failed_rules: Vec<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: HealthStatus,

    /// Service version
    pub version: String,

    /// Uptime in seconds
    pub uptime_seconds: u64,

    /// Number of registered types
    pub registered_types: usize,

    /// RBAC backend in use
    pub backend: String,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is up but cannot serve decisions
    Unhealthy,
}
