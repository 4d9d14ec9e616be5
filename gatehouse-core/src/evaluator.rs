//! Policy evaluation over rule descriptors

use crate::config::UnannotatedPolicy;
use crate::descriptor::{Requirement, RouteContext, RuleDescriptor};
use crate::error::{GatehouseError, Result};
use crate::rbac::RbacStore;
use crate::route::RequestKind;
use crate::types::Actor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{instrument, trace, warn};

/// Status code attached to every denial
pub const FORBIDDEN: u16 = 403;

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    /// Rule blocks the route outright
    RouteBlocked,
    /// Rule is restricted to the other route context
    RouteContextMismatch,
    /// Actor lacks the required permission
    PermissionDenied,
    /// Actor lacks the required role
    RoleDenied,
    /// Actor is not of the required user type
    UserTypeDenied,
    /// Target declares no rules and unannotated targets are denied
    NoRules,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DenialReason::RouteBlocked => "RouteBlocked",
            DenialReason::RouteContextMismatch => "RouteContextMismatch",
            DenialReason::PermissionDenied => "PermissionDenied",
            DenialReason::RoleDenied => "RoleDenied",
            DenialReason::UserTypeDenied => "UserTypeDenied",
            DenialReason::NoRules => "NoRules",
        };
        f.write_str(name)
    }
}

/// A denial with its user-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    /// Reason code
    pub reason: DenialReason,
    /// Message for the caller
    pub message: String,
    /// Suggested HTTP status
    pub status_hint: u16,
}

impl Denial {
    fn new(reason: DenialReason, message: impl Into<String>) -> Self {
        Denial {
            reason,
            message: message.into(),
            status_hint: FORBIDDEN,
        }
    }
}

/// Authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    /// Request may proceed
    Allow,
    /// Request is refused
    Deny(Denial),
}

impl Decision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// The denial, if any
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow => None,
            Decision::Deny(denial) => Some(denial),
        }
    }

    /// Denial reason, if any
    pub fn reason(&self) -> Option<DenialReason> {
        self.denial().map(|d| d.reason)
    }
}

/// Result of checking one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// The rule
    pub rule: RuleDescriptor,
    /// Denial produced by the rule, `None` when it passed
    pub denial: Option<Denial>,
}

impl RuleOutcome {
    /// Whether the rule passed
    pub fn passed(&self) -> bool {
        self.denial.is_none()
    }
}

/// Full evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// The decision
    pub decision: Decision,
    /// Per-rule outcomes in rule order
    pub outcomes: Vec<RuleOutcome>,
    /// Evaluation time in nanoseconds
    pub evaluation_time_ns: u64,
}

impl Evaluation {
    /// Allow without evaluating anything
    pub fn allow_all() -> Self {
        Evaluation {
            decision: Decision::Allow,
            outcomes: Vec::new(),
            evaluation_time_ns: 0,
        }
    }
}

/// Evaluates rules against an actor
///
/// Stateless apart from its RBAC handle; safe to share across threads.
#[derive(Clone)]
pub struct PolicyEvaluator {
    rbac: Arc<dyn RbacStore>,
    unannotated: UnannotatedPolicy,
}

impl PolicyEvaluator {
    /// Evaluator reading roles and permissions from `rbac`
    pub fn new(rbac: Arc<dyn RbacStore>) -> Self {
        PolicyEvaluator {
            rbac,
            unannotated: UnannotatedPolicy::Allow,
        }
    }

    /// Set the decision for targets without rules
    pub fn with_unannotated(mut self, policy: UnannotatedPolicy) -> Self {
        self.unannotated = policy;
        self
    }

    /// Evaluate every rule; the first failing rule decides the denial
    ///
    /// Storage failures are returned as errors and never turn into an allow.
    #[instrument(skip(self, rules), fields(actor = actor.id, rules = rules.len(), kind = %kind))]
    pub fn evaluate(
        &self,
        rules: &[RuleDescriptor],
        actor: &Actor,
        kind: RequestKind,
    ) -> Result<Evaluation> {
        let start = Instant::now();

        if rules.is_empty() {
            let decision = match self.unannotated {
                UnannotatedPolicy::Allow => Decision::Allow,
                UnannotatedPolicy::Deny => Decision::Deny(Denial::new(
                    DenialReason::NoRules,
                    "No authorization rules are declared for this action.",
                )),
            };
            return Ok(Evaluation {
                decision,
                outcomes: Vec::new(),
                evaluation_time_ns: start.elapsed().as_nanos() as u64,
            });
        }

        let mut outcomes = Vec::with_capacity(rules.len());
        for rule in rules {
            let denial = self.check_rule(rule, actor, kind)?;
            trace!(rule = %rule, passed = denial.is_none(), "Rule checked");
            outcomes.push(RuleOutcome {
                rule: rule.clone(),
                denial,
            });
        }

        let decision = outcomes
            .iter()
            .find_map(|o| o.denial.clone())
            .map(Decision::Deny)
            .unwrap_or(Decision::Allow);

        Ok(Evaluation {
            decision,
            outcomes,
            evaluation_time_ns: start.elapsed().as_nanos() as u64,
        })
    }

    fn check_rule(
        &self,
        rule: &RuleDescriptor,
        actor: &Actor,
        kind: RequestKind,
    ) -> Result<Option<Denial>> {
        match (rule.route, kind) {
            (RouteContext::Block, _) => {
                return Ok(Some(Denial::new(
                    DenialReason::RouteBlocked,
                    "This route is currently blocked.",
                )))
            }
            (RouteContext::Api, RequestKind::Web) | (RouteContext::Web, RequestKind::Api) => {
                return Ok(Some(Denial::new(
                    DenialReason::RouteContextMismatch,
                    format!("This route is not accessible from {} context.", kind),
                )))
            }
            _ => {}
        }

        let type_matches = match &rule.user_type {
            Requirement::Any => true,
            Requirement::Named(user_type) => actor.is_user_type(user_type),
        };

        if let Requirement::Named(permission) = &rule.permission {
            let held = match self.rbac.has_permission(actor.id, permission) {
                Ok(held) => held,
                Err(GatehouseError::PermissionNotFound(name)) => {
                    warn!(permission = %name, "Rule references an unknown permission");
                    return Ok(Some(Denial::new(
                        DenialReason::PermissionDenied,
                        format!("Unauthorized action. Permission '{}' not found.", name),
                    )));
                }
                Err(e) => return Err(e),
            };

            if !(type_matches && held) {
                return Ok(Some(Denial::new(
                    DenialReason::PermissionDenied,
                    "Unauthorized action.",
                )));
            }
        }

        if let Requirement::Named(role) = &rule.role {
            if !(type_matches && self.rbac.has_role(actor.id, role)?) {
                return Ok(Some(Denial::new(DenialReason::RoleDenied, "Unauthorized action.")));
            }
        }

        if rule.permission.is_any() && rule.role.is_any() && !type_matches {
            return Ok(Some(Denial::new(
                DenialReason::UserTypeDenied,
                "Unauthorized action.",
            )));
        }

        Ok(None)
    }
}

impl fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEvaluator")
            .field("rbac", &self.rbac.backend_name())
            .field("unannotated", &self.unannotated)
            .finish()
    }
}
