//! Gatehouse Core - declarative authorization and dynamic user fields
//!
//! Rules are attached to handler types and their operations, discovered
//! through an explicit registry, and evaluated against an actor's roles,
//! permissions and user type with web/API route restrictions. Entity types
//! can also declare dynamic fields, which are validated and persisted
//! alongside the user record.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod evaluator;
pub mod fields;
pub mod gatekeeper;
pub mod manager;
pub mod manifest;
pub mod rbac;
pub mod registry;
pub mod route;
pub mod schema;
pub mod types;

pub use cache::DescriptorCache;
pub use config::{GatehouseConfig, RoleIntegration, UnannotatedPolicy};
pub use descriptor::{FieldDescriptor, FieldType, Requirement, RoleDeclaration, RouteContext, RuleDescriptor};
pub use error::{GatehouseError, Result};
pub use evaluator::{Decision, Denial, DenialReason, Evaluation, PolicyEvaluator};
pub use fields::{FieldError, FieldErrorKind, FieldPersistence, FieldValidator};
pub use gatekeeper::{AuthorizationRequest, Gatekeeper};
pub use manager::{User, UserManager};
pub use manifest::{parse_manifest, scan_directory, ScanReport};
pub use rbac::{CustomRbacStore, DelegatedRbacStore, RbacStore};
pub use registry::{DuplicateFieldPolicy, FieldSchema, MetadataRegistry, RegistryBuilder, TargetRef};
pub use route::{RequestInfo, RequestKind, RouteClassifier};
pub use types::{Actor, Payload, PrincipalId, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
