//! Benchmarks for authorization decisions
//!
//! Covers rule evaluation against the custom RBAC backend, request
//! classification and payload validation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gatehouse_core::config::TableNames;
use gatehouse_core::db::Database;
use gatehouse_core::descriptor::{FieldDescriptor, FieldType, RouteContext, RuleDescriptor};
use gatehouse_core::evaluator::PolicyEvaluator;
use gatehouse_core::fields::{FieldPersistence, FieldValidator};
use gatehouse_core::gatekeeper::{AuthorizationRequest, Gatekeeper};
use gatehouse_core::rbac::{CustomRbacStore, RbacStore};
use gatehouse_core::registry::{FieldSchema, MetadataRegistry};
use gatehouse_core::route::{RequestInfo, RequestKind, RouteClassifier};
use gatehouse_core::types::{Actor, Payload, Value};
use std::sync::Arc;

/// Store with `n` permissions granted to a single role held by principal 1
fn seeded_store(n: usize) -> Arc<CustomRbacStore> {
    let store = Arc::new(CustomRbacStore::new(Arc::new(Database::in_memory())));
    store.create_role("admin").unwrap();
    for i in 0..n {
        let permission = format!("perm-{}", i);
        store.create_permission(&permission).unwrap();
        store.grant_permission("admin", &permission).unwrap();
    }
    store.assign_role(1, "admin").unwrap();
    store
}

fn rules(n: usize) -> Vec<RuleDescriptor> {
    (0..n)
        .map(|i| {
            RuleDescriptor::new()
                .permission(format!("perm-{}", i))
                .role("admin")
                .route(RouteContext::Api)
        })
        .collect()
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");

    for size in [1, 10, 50].iter() {
        let evaluator = PolicyEvaluator::new(seeded_store(*size));
        let rules = rules(*size);
        let actor = Actor::new(1);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rules, |b, rules| {
            b.iter(|| {
                evaluator
                    .evaluate(black_box(rules), black_box(&actor), RequestKind::Api)
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_gatekeeper(c: &mut Criterion) {
    let mut builder = MetadataRegistry::builder();
    builder
        .class_rule("ReportController", RuleDescriptor::new().route(RouteContext::Web))
        .member_rule("ReportController", "show", RuleDescriptor::new().permission("view-reports"));
    let gatekeeper = Gatekeeper::with_registry(builder.build()).unwrap();
    gatekeeper.rbac().create_permission("view-reports").unwrap();
    gatekeeper.rbac().assign_role(1, "viewer").unwrap();
    gatekeeper.rbac().grant_permission("viewer", "view-reports").unwrap();

    let request = AuthorizationRequest::new(
        "ReportController::show".parse().unwrap(),
        Actor::new(1),
        RequestInfo::new("/reports/7"),
    );

    c.bench_function("gatekeeper_authorize", |b| {
        b.iter(|| gatekeeper.authorize(black_box(&request)).unwrap())
    });
}

fn bench_classify(c: &mut Criterion) {
    let classifier = RouteClassifier::new("api");
    let mut group = c.benchmark_group("classify");

    let cases = [
        ("prefix", RequestInfo::new("/api/v1/users/42")),
        (
            "accept",
            RequestInfo::new("/users/42").with_accept("application/vnd.app+json; q=0.9, text/html"),
        ),
        ("web", RequestInfo::new("/users/42").with_accept("text/html")),
    ];

    for (name, request) in cases.iter() {
        group.bench_with_input(BenchmarkId::new("kind", name), request, |b, request| {
            b.iter(|| classifier.classify(black_box(request)))
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");

    for users in [10, 1000].iter() {
        let db = Arc::new(Database::new(TableNames::default(), false));
        let persistence = Arc::new(FieldPersistence::new(db));
        let schema: FieldSchema = vec![
            FieldDescriptor::new("badge", FieldType::Integer).unwrap().required().unique(),
            FieldDescriptor::new("joined", FieldType::Date).unwrap(),
        ]
        .into_iter()
        .collect();
        for id in 0..*users {
            let mut values = Payload::new();
            values.insert("badge".to_string(), Value::Integer(id as i64));
            persistence.save(id as u64, &schema, &values).unwrap();
        }

        let validator = FieldValidator::new(persistence);

        let mut payload = Payload::new();
        payload.insert("badge".to_string(), Value::Integer(-1));
        payload.insert("joined".to_string(), Value::string("2024-03-01"));

        group.bench_with_input(BenchmarkId::from_parameter(users), &payload, |b, payload| {
            b.iter(|| validator.validate(&schema, black_box(payload), None).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_evaluate,
    bench_gatekeeper,
    bench_classify,
    bench_validate
);
criterion_main!(benches);
