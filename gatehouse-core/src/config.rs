//! Configuration for Gatehouse
//!
//! Loaded from TOML; every section and key is optional and falls back to
//! the defaults below.
//!
//! ```toml
//! role_integration = "custom"
//! user_entity = "User"
//! enable_dynamic_fields = true
//! dynamic_fields_column = true
//! soft_deletes = true
//!
//! [authorization]
//! enabled = true
//! api_prefix = "api"
//! unannotated = "allow"
//! duplicate_fields = "override"
//!
//! [cache]
//! enabled = true
//! ttl_minutes = 1440
//!
//! [tables]
//! users = "users"
//!
//! [[roles]]
//! name = "admin"
//! permissions = ["edit-users"]
//!
//! [[assignments]]
//! principal = 1
//! roles = ["admin"]
//! ```

use crate::descriptor::RoleDeclaration;
use crate::error::{GatehouseError, Result};
use crate::registry::DuplicateFieldPolicy;
use crate::types::PrincipalId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which RBAC backend answers role and permission questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleIntegration {
    /// Built-in relational role tables
    #[default]
    Custom,
    /// External permission provider
    #[serde(alias = "spatie")]
    Delegated,
}

/// Decision for targets that declare no rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnannotatedPolicy {
    /// Allow access
    #[default]
    Allow,
    /// Deny access with `NoRules`
    Deny,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatehouseConfig {
    /// RBAC backend selection
    pub role_integration: RoleIntegration,
    /// Entity type whose declared fields and roles apply to users
    pub user_entity: String,
    /// Validate and persist declared dynamic fields
    pub enable_dynamic_fields: bool,
    /// Users table carries the embedded `dynamic_fields` document;
    /// otherwise values go to the side table
    pub dynamic_fields_column: bool,
    /// Delete marks users instead of removing rows
    pub soft_deletes: bool,
    /// Authorization behavior
    pub authorization: AuthorizationConfig,
    /// Descriptor cache
    pub cache: CacheConfig,
    /// Table names
    pub tables: TableNames,
    /// Roles created at startup in addition to those declared on the user entity
    pub roles: Vec<RoleDeclaration>,
    /// Grants applied at startup
    pub assignments: Vec<Assignment>,
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        GatehouseConfig {
            role_integration: RoleIntegration::Custom,
            user_entity: "User".to_string(),
            enable_dynamic_fields: true,
            dynamic_fields_column: true,
            soft_deletes: true,
            authorization: AuthorizationConfig::default(),
            cache: CacheConfig::default(),
            tables: TableNames::default(),
            roles: Vec::new(),
            assignments: Vec::new(),
        }
    }
}

impl GatehouseConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| GatehouseError::ConfigError(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GatehouseError::ConfigError(format!(
                "File does not exist: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// `[[assignments]]` entry: roles and direct permissions of one principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Principal receiving the grants
    pub principal: PrincipalId,
    /// Role names
    #[serde(default)]
    pub roles: Vec<String>,
    /// Permissions granted directly; needs a backend with direct grants
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// `[authorization]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// When false every request is allowed without consulting rules
    pub enabled: bool,
    /// Path prefix that marks API requests
    pub api_prefix: String,
    /// Decision for targets with no rules
    pub unannotated: UnannotatedPolicy,
    /// Duplicate field handling during registration
    pub duplicate_fields: DuplicateFieldPolicy,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        AuthorizationConfig {
            enabled: true,
            api_prefix: "api".to_string(),
            unannotated: UnannotatedPolicy::Allow,
            duplicate_fields: DuplicateFieldPolicy::Override,
        }
    }
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache scanned descriptors
    pub enabled: bool,
    /// Lifetime of a cached scan in minutes
    pub ttl_minutes: u64,
}

impl CacheConfig {
    /// TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            ttl_minutes: 1440,
        }
    }
}

/// `[tables]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Users table
    pub users: String,
    /// Roles table
    pub roles: String,
    /// Permissions table
    pub permissions: String,
    /// Principal to role pivot
    pub user_roles: String,
    /// Role to permission pivot
    pub role_permissions: String,
    /// Side table for dynamic field values
    pub user_fields: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            users: "users".to_string(),
            roles: "roles".to_string(),
            permissions: "permissions".to_string(),
            user_roles: "user_roles".to_string(),
            role_permissions: "role_permissions".to_string(),
            user_fields: "user_fields".to_string(),
        }
    }
}
