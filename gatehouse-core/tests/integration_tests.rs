//! Integration tests for Gatehouse
//!
//! Tests the full pipeline: manifests → registry → classifier → evaluator →
//! RBAC backend, plus user creation with dynamic fields.

use gatehouse_core::cache::DescriptorCache;
use gatehouse_core::config::{GatehouseConfig, RoleIntegration, UnannotatedPolicy};
use gatehouse_core::db::Database;
use gatehouse_core::descriptor::{FieldDescriptor, FieldType, RouteContext, RuleDescriptor};
use gatehouse_core::evaluator::{DenialReason, PolicyEvaluator};
use gatehouse_core::fields::{FieldErrorKind, FieldPersistence, FieldValidator};
use gatehouse_core::gatekeeper::{AuthorizationRequest, Gatekeeper};
use gatehouse_core::manifest::{parse_manifest, scan_directory};
use gatehouse_core::rbac::{CustomRbacStore, RbacStore};
use gatehouse_core::registry::{DuplicateFieldPolicy, FieldSchema, MetadataRegistry, TargetRef};
use gatehouse_core::route::{RequestInfo, RequestKind, RouteClassifier};
use gatehouse_core::types::{Actor, Payload, Value};
use gatehouse_core::GatehouseError;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const APP_MANIFEST: &str = r#"
[[types]]
name = "UserController"

[types.members.index]
rules = [{ permission = "view-users" }]

[types.members.update]
rules = [{ permission = "edit-users", role = "admin", user_type = "manager", route = "api" }]

[types.members.purge]
rules = [{ route = "block" }]

[[types]]
name = "DashboardController"
rules = [{ route = "web" }]

[[types]]
name = "User"
fields = [
    { name = "phone", type = "string", required = true, unique = true },
    { name = "age", type = "integer" },
    { name = "subscribed", type = "boolean" },
]
roles = [
    { name = "admin", permissions = ["edit-users", "view-users"] },
    { name = "viewer", permissions = ["view-users"] },
]
"#;

fn gatekeeper(config: GatehouseConfig) -> Gatekeeper {
    let manifest = parse_manifest(APP_MANIFEST).expect("manifest parses");
    let mut builder = MetadataRegistry::builder();
    manifest.register(&mut builder).expect("manifest registers");

    Gatekeeper::from_config(config, Arc::new(DescriptorCache::fixed(builder.build())))
        .expect("gatekeeper builds")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gatehouse_core=debug")
        .with_test_writer()
        .try_init();
}

fn request(target: &str, actor: Actor, info: RequestInfo) -> AuthorizationRequest {
    AuthorizationRequest::new(target.parse().expect("valid target"), actor, info)
}

fn payload(entries: &[(&str, Value)]) -> Payload {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_manager_on_web_route_is_context_mismatch() {
    let gatekeeper = gatekeeper(GatehouseConfig::default());
    gatekeeper.rbac().assign_role(1, "admin").unwrap();
    let manager = Actor::new(1).with_user_type("manager");

    let web = gatekeeper
        .authorize(&request("UserController::update", manager.clone(), RequestInfo::new("/users/1")))
        .unwrap();
    assert_eq!(web.decision.reason(), Some(DenialReason::RouteContextMismatch));

    let plain_user = gatekeeper
        .authorize(&request(
            "UserController::update",
            Actor::new(1).with_user_type("user"),
            RequestInfo::new("/users/1"),
        ))
        .unwrap();
    assert_eq!(plain_user.decision.reason(), Some(DenialReason::RouteContextMismatch));

    let api = gatekeeper
        .authorize(&request(
            "UserController::update",
            manager,
            RequestInfo::new("/users/1").with_accept("application/json"),
        ))
        .unwrap();
    assert!(api.decision.is_allowed());
}

#[test]
fn test_blocked_route_denies_everyone() {
    let gatekeeper = gatekeeper(GatehouseConfig::default());
    gatekeeper.rbac().assign_role(1, "admin").unwrap();

    for path in ["/users/purge", "/api/users/purge"] {
        let eval = gatekeeper
            .authorize(&request("UserController::purge", Actor::new(1), RequestInfo::new(path)))
            .unwrap();
        let denial = eval.decision.denial().unwrap();
        assert_eq!(denial.reason, DenialReason::RouteBlocked);
        assert_eq!(denial.status_hint, 403);
        assert_eq!(denial.message, "This route is currently blocked.");
    }
}

#[test]
fn test_granting_permission_flips_decision() {
    let gatekeeper = gatekeeper(GatehouseConfig::default());
    let actor = Actor::new(2);
    let req = request("UserController::index", actor, RequestInfo::new("/users"));

    let before = gatekeeper.authorize(&req).unwrap();
    assert_eq!(before.decision.reason(), Some(DenialReason::PermissionDenied));

    gatekeeper.rbac().assign_role(2, "viewer").unwrap();
    assert!(gatekeeper.authorize(&req).unwrap().decision.is_allowed());

    assert!(gatekeeper.rbac().revoke_permission("viewer", "view-users").unwrap());
    assert!(!gatekeeper.authorize(&req).unwrap().decision.is_allowed());
}

#[test]
fn test_web_only_type_from_api_client() {
    let gatekeeper = gatekeeper(GatehouseConfig::default());
    let eval = gatekeeper
        .authorize(&request(
            "DashboardController::show",
            Actor::new(3),
            RequestInfo::new("/api/dashboard"),
        ))
        .unwrap();
    assert_eq!(eval.decision.reason(), Some(DenialReason::RouteContextMismatch));
}

#[test]
fn test_zero_rules_default_allow_and_strict_mode() {
    let mut builder = MetadataRegistry::builder();
    builder.declare_type("StatusController");
    let registry = builder.build();

    let gatekeeper = Gatekeeper::with_registry(registry.clone()).unwrap();
    let req = request("StatusController::show", Actor::new(9), RequestInfo::new("/status"));
    assert!(gatekeeper.authorize(&req).unwrap().decision.is_allowed());

    let mut config = GatehouseConfig::default();
    config.authorization.unannotated = UnannotatedPolicy::Deny;
    let strict = Gatekeeper::from_config(config, Arc::new(DescriptorCache::fixed(registry))).unwrap();
    assert_eq!(
        strict.authorize(&req).unwrap().decision.reason(),
        Some(DenialReason::NoRules)
    );
}

#[test]
fn test_double_assign_on_custom_backend_creates_one_row() {
    let db = Arc::new(Database::in_memory());
    let store = CustomRbacStore::new(db.clone());

    store.assign_role(1, "admin").unwrap();
    store.assign_role(1, "admin").unwrap();

    assert_eq!(db.user_roles().len(), 1);
    assert!(store.has_role(1, "admin").unwrap());
}

#[test]
fn test_delegated_backend_end_to_end() {
    let config = GatehouseConfig {
        role_integration: RoleIntegration::Delegated,
        ..GatehouseConfig::default()
    };
    let gatekeeper = gatekeeper(config);
    assert_eq!(gatekeeper.rbac().backend_name(), "delegated");

    assert!(matches!(
        gatekeeper.rbac().assign_role(4, "superuser"),
        Err(GatehouseError::RoleNotFound(_))
    ));

    gatekeeper.rbac().give_permission_to(4, "view-users").unwrap();
    let eval = gatekeeper
        .authorize(&request("UserController::index", Actor::new(4), RequestInfo::new("/users")))
        .unwrap();
    assert!(eval.decision.is_allowed());
}

#[test]
fn test_user_lifecycle_with_dynamic_fields() {
    for column in [true, false] {
        let config = GatehouseConfig {
            dynamic_fields_column: column,
            ..GatehouseConfig::default()
        };
        let gatekeeper = gatekeeper(config);
        let users = gatekeeper.users();

        let ada = users
            .create(&payload(&[
                ("name", Value::string("Ada")),
                ("email", Value::string("ada@example.com")),
                ("password", Value::string("secret")),
                ("phone", Value::string("555-0100")),
                ("subscribed", Value::Bool(true)),
            ]))
            .unwrap();
        assert_eq!(ada.field("subscribed"), Some(&Value::Bool(true)));

        let same_phone = users
            .update(ada.id, &payload(&[("phone", Value::string("555-0100"))]))
            .unwrap();
        assert_eq!(same_phone.field("phone"), Some(&Value::string("555-0100")));

        let err = users
            .create(&payload(&[
                ("name", Value::string("Bob")),
                ("email", Value::string("bob@example.com")),
                ("password", Value::string("secret")),
                ("phone", Value::string("555-0100")),
                ("age", Value::string("old")),
            ]))
            .unwrap_err();
        let kinds: Vec<_> = err.field_errors().iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                FieldErrorKind::Unique,
                FieldErrorKind::Type {
                    expected: FieldType::Integer
                }
            ]
        );

        users.set_user_type(ada.id, "manager").unwrap();
        users.assign_role(ada.id, "admin").unwrap();
        let eval = gatekeeper
            .authorize(&request(
                "UserController::update",
                users.actor(ada.id).unwrap(),
                RequestInfo::new("/api/users/1"),
            ))
            .unwrap();
        assert!(eval.decision.is_allowed(), "column={}", column);
    }
}

#[test]
fn test_validator_and_persistence_share_lookup() {
    let db = Arc::new(Database::new(Default::default(), false));
    let persistence = Arc::new(FieldPersistence::new(db.clone()));
    let validator = FieldValidator::new(persistence.clone());
    let schema: FieldSchema = vec![FieldDescriptor::new("badge", FieldType::Integer)
        .unwrap()
        .unique()]
    .into_iter()
    .collect();

    persistence.save(10, &schema, &payload(&[("badge", Value::Integer(7))])).unwrap();

    let same = payload(&[("badge", Value::string("7"))]);
    assert!(validator.validate(&schema, &same, Some(10)).is_ok());
    assert!(validator.validate(&schema, &same, Some(11)).is_err());

    db.close();
    assert!(matches!(
        validator.validate(&schema, &same, None),
        Err(GatehouseError::StoreUnavailable(_))
    ));
}

#[test]
fn test_bulk_scan_feeds_gatekeeper() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.toml"), APP_MANIFEST).unwrap();
    fs::write(dir.path().join("zz_broken.toml"), "types = 42").unwrap();

    let path = dir.path().to_path_buf();
    let cache = DescriptorCache::new(&Default::default(), move || {
        Ok(scan_directory(&path, DuplicateFieldPolicy::Override)?.registry)
    });
    let gatekeeper = Gatekeeper::from_config(GatehouseConfig::default(), Arc::new(cache)).unwrap();

    let registry = gatekeeper.registry().unwrap();
    assert!(registry.contains_type("DashboardController"));
    assert_eq!(registry.roles_for("User").unwrap().len(), 2);
    assert!(gatekeeper.rbac().role_exists("viewer").unwrap());
}

#[test]
fn test_evaluator_with_classifier() {
    let store = Arc::new(CustomRbacStore::new(Arc::new(Database::in_memory())));
    let evaluator = PolicyEvaluator::new(store);
    let classifier = RouteClassifier::new("api");

    let rules = [RuleDescriptor::new().route(RouteContext::Api)];
    let xhr = RequestInfo::new("/reports").with_accept("*/*").with_ajax(true);
    assert_eq!(classifier.classify(&xhr), RequestKind::Api);

    let eval = evaluator
        .evaluate(&rules, &Actor::new(1), classifier.classify(&xhr))
        .unwrap();
    assert!(eval.decision.is_allowed());
    assert_eq!(eval.outcomes.len(), 1);
}

#[test]
fn test_target_parsing_errors() {
    assert!("".parse::<TargetRef>().is_err());
    assert!("UserController::".parse::<TargetRef>().is_err());
}
