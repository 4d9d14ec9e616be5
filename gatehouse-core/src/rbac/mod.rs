//! Role and permission storage
//!
//! [`RbacStore`] is the seam between authorization and wherever roles live.
//! Two backends ship with the crate:
//!
//! - [`CustomRbacStore`]: relational tables in [`crate::db::Database`]
//! - [`DelegatedRbacStore`]: forwards to an external [`RbacProvider`]
//!
//! The backend is picked once at startup with [`select_backend`].

mod custom;
mod delegated;

pub use custom::CustomRbacStore;
pub use delegated::{DelegatedRbacStore, MemoryProvider, RbacProvider};

use crate::config::{Assignment, GatehouseConfig, RoleIntegration};
use crate::db::Database;
use crate::descriptor::RoleDeclaration;
use crate::error::{GatehouseError, Result};
use crate::types::PrincipalId;
use std::sync::Arc;
use tracing::info;

/// Role and permission backend
///
/// Reads propagate storage failures as errors. Mutations that hit a failing
/// store are logged and reported as `false` or `Err`, never panic.
pub trait RbacStore: Send + Sync {
    /// Short backend identifier for logs
    fn backend_name(&self) -> &'static str;

    /// Whether a role is known
    fn role_exists(&self, role: &str) -> Result<bool>;

    /// Whether a permission is known
    fn permission_exists(&self, permission: &str) -> Result<bool>;

    /// Give a principal a role; assigning a held role is a no-op
    fn assign_role(&self, principal: PrincipalId, role: &str) -> Result<()>;

    /// Take a role away; `false` when the role or the assignment is absent
    fn remove_role(&self, principal: PrincipalId, role: &str) -> bool;

    /// Whether a principal holds a role
    fn has_role(&self, principal: PrincipalId, role: &str) -> Result<bool>;

    /// Whether a principal holds a permission through any route the backend supports
    ///
    /// Fails with `PermissionNotFound` when the permission is unknown.
    fn has_permission(&self, principal: PrincipalId, permission: &str) -> Result<bool>;

    /// Role names held by a principal, sorted
    fn roles_of(&self, principal: PrincipalId) -> Result<Vec<String>>;

    /// Create a role if it does not exist
    fn create_role(&self, role: &str) -> Result<()>;

    /// Create a permission if it does not exist
    fn create_permission(&self, permission: &str) -> Result<()>;

    /// Attach a permission to a role
    fn grant_permission(&self, role: &str, permission: &str) -> Result<()>;

    /// Detach a permission from a role; `false` when it was not attached
    fn revoke_permission(&self, role: &str, permission: &str) -> Result<bool>;

    /// Permission names attached to a role, sorted
    fn role_permissions(&self, role: &str) -> Result<Vec<String>>;

    /// Whether permissions can be granted to principals directly
    fn supports_direct_grants(&self) -> bool {
        false
    }

    /// Grant a permission directly to a principal
    fn give_permission_to(&self, _principal: PrincipalId, _permission: &str) -> Result<()> {
        Err(GatehouseError::Unsupported(format!(
            "direct permission grants on the {} backend",
            self.backend_name()
        )))
    }

    /// Revoke a direct grant; `false` when none existed
    fn revoke_permission_from(&self, _principal: PrincipalId, _permission: &str) -> Result<bool> {
        Err(GatehouseError::Unsupported(format!(
            "direct permission grants on the {} backend",
            self.backend_name()
        )))
    }
}

/// Pick the backend named by `role_integration`
///
/// The delegated backend is wired to the bundled [`MemoryProvider`]; hosts with
/// their own provider build a [`DelegatedRbacStore`] directly.
pub fn select_backend(
    config: &GatehouseConfig,
    db: Arc<Database>,
    declared: Vec<RoleDeclaration>,
) -> Arc<dyn RbacStore> {
    let store: Arc<dyn RbacStore> = match config.role_integration {
        RoleIntegration::Custom => Arc::new(CustomRbacStore::new(db).with_declared_roles(declared)),
        RoleIntegration::Delegated => Arc::new(DelegatedRbacStore::new(MemoryProvider::new())),
    };
    info!("Using {} RBAC backend", store.backend_name());
    store
}

/// Create declared roles and their permissions in a store
pub fn seed_declared_roles(store: &dyn RbacStore, roles: &[RoleDeclaration]) -> Result<()> {
    for role in roles {
        store.create_role(&role.name)?;
        for permission in &role.permissions {
            store.create_permission(permission)?;
            store.grant_permission(&role.name, permission)?;
        }
    }
    Ok(())
}

/// Grant configured roles and direct permissions
///
/// Unknown roles on the delegated backend fail with `RoleNotFound`. Direct
/// permissions on a backend without direct grants are a configuration error.
pub fn apply_assignments(store: &dyn RbacStore, assignments: &[Assignment]) -> Result<()> {
    for assignment in assignments {
        if !assignment.permissions.is_empty() && !store.supports_direct_grants() {
            return Err(GatehouseError::ConfigError(format!(
                "principal {}: the {} backend grants permissions through roles only",
                assignment.principal,
                store.backend_name()
            )));
        }

        for role in &assignment.roles {
            store.assign_role(assignment.principal, role)?;
        }
        for permission in &assignment.permissions {
            store.create_permission(permission)?;
            store.give_permission_to(assignment.principal, permission)?;
        }
    }

    if !assignments.is_empty() {
        info!("Applied grants for {} principals", assignments.len());
    }
    Ok(())
}
