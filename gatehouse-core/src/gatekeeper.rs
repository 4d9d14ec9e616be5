//! Gatekeeper: the authorization entry point

use crate::cache::DescriptorCache;
use crate::config::GatehouseConfig;
use crate::db::Database;
use crate::error::Result;
use crate::evaluator::{Decision, Evaluation, PolicyEvaluator};
use crate::manager::UserManager;
use crate::rbac::{apply_assignments, seed_declared_roles, select_backend, RbacStore};
use crate::registry::{MetadataRegistry, TargetRef};
use crate::route::{RequestInfo, RouteClassifier};
use crate::types::Actor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Everything needed to authorize one operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Operation being invoked
    pub target: TargetRef,
    /// Who is invoking it
    pub actor: Actor,
    /// Request details used for route classification
    #[serde(default)]
    pub request: RequestInfo,
}

impl AuthorizationRequest {
    /// Request for a target by an actor
    pub fn new(target: TargetRef, actor: Actor, request: RequestInfo) -> Self {
        AuthorizationRequest {
            target,
            actor,
            request,
        }
    }
}

/// Resolves rules, classifies the request and evaluates
pub struct Gatekeeper {
    config: Arc<GatehouseConfig>,
    descriptors: Arc<DescriptorCache>,
    db: Arc<Database>,
    rbac: Arc<dyn RbacStore>,
    classifier: RouteClassifier,
    evaluator: PolicyEvaluator,
    metrics: Arc<GatekeeperMetrics>,
}

impl Gatekeeper {
    /// Assemble from explicit components
    pub fn new(
        config: GatehouseConfig,
        descriptors: Arc<DescriptorCache>,
        db: Arc<Database>,
        rbac: Arc<dyn RbacStore>,
    ) -> Self {
        let classifier = RouteClassifier::new(config.authorization.api_prefix.clone());
        let evaluator =
            PolicyEvaluator::new(rbac.clone()).with_unannotated(config.authorization.unannotated);

        Gatekeeper {
            config: Arc::new(config),
            descriptors,
            db,
            rbac,
            classifier,
            evaluator,
            metrics: Arc::new(GatekeeperMetrics::default()),
        }
    }

    /// Build the database and RBAC backend named by the configuration
    ///
    /// Roles declared on the user entity and in `[[roles]]` are created in the
    /// backend, then `[[assignments]]` are granted.
    pub fn from_config(config: GatehouseConfig, descriptors: Arc<DescriptorCache>) -> Result<Self> {
        let registry = descriptors.get()?;
        let mut declared = registry
            .roles_for(&config.user_entity)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        declared.extend(config.roles.iter().cloned());

        let db = Arc::new(Database::new(config.tables.clone(), config.dynamic_fields_column));
        let rbac = select_backend(&config, db.clone(), declared.clone());
        seed_declared_roles(rbac.as_ref(), &declared)?;
        apply_assignments(rbac.as_ref(), &config.assignments)?;

        info!(
            types = registry.len(),
            roles = declared.len(),
            backend = rbac.backend_name(),
            "Gatekeeper ready"
        );
        Ok(Gatekeeper::new(config, descriptors, db, rbac))
    }

    /// Gatekeeper over a fixed registry with default configuration
    pub fn with_registry(registry: MetadataRegistry) -> Result<Self> {
        Gatekeeper::from_config(
            GatehouseConfig::default(),
            Arc::new(DescriptorCache::fixed(registry)),
        )
    }

    /// Authorize a request
    ///
    /// Unknown targets fail with `TargetNotFound`; storage failures are
    /// returned as errors and never allow.
    #[instrument(skip(self, request), fields(target = %request.target, actor = request.actor.id))]
    pub fn authorize(&self, request: &AuthorizationRequest) -> Result<Evaluation> {
        let start = Instant::now();

        if !self.config.authorization.enabled {
            debug!("Authorization disabled, allowing");
            let evaluation = Evaluation::allow_all();
            self.metrics.record(&evaluation.decision, start);
            return Ok(evaluation);
        }

        let result = self.evaluate(request);
        match &result {
            Ok(evaluation) => self.metrics.record(&evaluation.decision, start),
            Err(_) => self.metrics.record_error(),
        }
        result
    }

    fn evaluate(&self, request: &AuthorizationRequest) -> Result<Evaluation> {
        let registry = self.descriptors.get()?;
        let rules = registry.rules_for(&request.target)?;
        let kind = self.classifier.classify(&request.request);

        let evaluation = self.evaluator.evaluate(&rules, &request.actor, kind)?;
        debug!(
            kind = %kind,
            allowed = evaluation.decision.is_allowed(),
            "Evaluated {} rules",
            rules.len()
        );
        Ok(evaluation)
    }

    /// Registry currently in use
    pub fn registry(&self) -> Result<Arc<MetadataRegistry>> {
        self.descriptors.get()
    }

    /// Rebuild the registry now
    pub fn reload_descriptors(&self) -> Result<usize> {
        Ok(self.descriptors.reload()?.len())
    }

    /// User manager sharing this gatekeeper's storage and backend
    pub fn users(&self) -> UserManager {
        UserManager::new(
            &self.config,
            self.db.clone(),
            self.descriptors.clone(),
            self.rbac.clone(),
        )
    }

    /// The RBAC backend
    pub fn rbac(&self) -> &Arc<dyn RbacStore> {
        &self.rbac
    }

    /// The database
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// The active configuration
    pub fn config(&self) -> &GatehouseConfig {
        &self.config
    }

    /// The route classifier
    pub fn classifier(&self) -> &RouteClassifier {
        &self.classifier
    }

    /// Decision counters
    pub fn metrics(&self) -> Arc<GatekeeperMetrics> {
        self.metrics.clone()
    }

    /// Whether storage is serving requests
    pub fn is_ready(&self) -> bool {
        self.db.is_available()
    }
}

impl std::fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("descriptors", &self.descriptors)
            .field("rbac", &self.rbac.backend_name())
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

/// Decision counters
#[derive(Debug, Default)]
pub struct GatekeeperMetrics {
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
    total_time_ns: AtomicU64,
}

impl GatekeeperMetrics {
    fn record(&self, decision: &Decision, start: Instant) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.total_time_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        match decision {
            Decision::Allow => self.allowed.fetch_add(1, Ordering::Relaxed),
            Decision::Deny(_) => self.denied.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_error(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let time = self.total_time_ns.load(Ordering::Relaxed);
        let decided = total.saturating_sub(self.errors.load(Ordering::Relaxed));

        MetricsSnapshot {
            total,
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_time_ns: if decided == 0 { 0 } else { time / decided },
        }
    }
}

/// Serializable counter values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Authorization calls
    pub total: u64,
    /// Allowed calls
    pub allowed: u64,
    /// Denied calls
    pub denied: u64,
    /// Calls that failed with an error
    pub errors: u64,
    /// Mean decision time in nanoseconds
    pub avg_time_ns: u64,
}
