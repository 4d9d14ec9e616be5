//! RBAC backend that forwards to an external permission provider

use super::RbacStore;
use crate::error::{GatehouseError, Result};
use crate::types::PrincipalId;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;
use tracing::{error, instrument};

/// An external role and permission model
///
/// The provider owns its own data; Gatehouse never creates roles implicitly
/// through it.
pub trait RbacProvider: Send + Sync {
    /// Look up a role by name
    fn find_role(&self, role: &str) -> Result<bool>;

    /// Look up a permission by name
    fn find_permission(&self, permission: &str) -> Result<bool>;

    /// Create a role
    fn create_role(&self, role: &str) -> Result<()>;

    /// Create a permission
    fn create_permission(&self, permission: &str) -> Result<()>;

    /// Assign an existing role
    fn assign_role(&self, principal: PrincipalId, role: &str) -> Result<()>;

    /// Remove a role; `false` when not held
    fn remove_role(&self, principal: PrincipalId, role: &str) -> Result<bool>;

    /// Roles held by a principal
    fn roles_of(&self, principal: PrincipalId) -> Result<BTreeSet<String>>;

    /// Whether a principal holds a permission through a role or directly
    fn has_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<bool>;

    /// Attach a permission to a role
    fn give_permission_to_role(&self, role: &str, permission: &str) -> Result<()>;

    /// Detach a permission from a role
    fn revoke_permission_from_role(&self, role: &str, permission: &str) -> Result<bool>;

    /// Permissions attached to a role
    fn permissions_of_role(&self, role: &str) -> Result<BTreeSet<String>>;

    /// Grant a permission directly
    fn give_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<()>;

    /// Revoke a direct grant
    fn revoke_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<bool>;
}

/// RBAC through an [`RbacProvider`]
#[derive(Debug)]
pub struct DelegatedRbacStore<P> {
    provider: P,
}

impl<P: RbacProvider> DelegatedRbacStore<P> {
    /// Wrap a provider
    pub fn new(provider: P) -> Self {
        DelegatedRbacStore { provider }
    }

    /// The wrapped provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn require_role(&self, role: &str) -> Result<()> {
        if self.provider.find_role(role)? {
            Ok(())
        } else {
            Err(GatehouseError::RoleNotFound(role.to_string()))
        }
    }

    fn require_permission(&self, permission: &str) -> Result<()> {
        if self.provider.find_permission(permission)? {
            Ok(())
        } else {
            Err(GatehouseError::PermissionNotFound(permission.to_string()))
        }
    }
}

impl<P: RbacProvider> RbacStore for DelegatedRbacStore<P> {
    fn backend_name(&self) -> &'static str {
        "delegated"
    }

    fn role_exists(&self, role: &str) -> Result<bool> {
        self.provider.find_role(role)
    }

    fn permission_exists(&self, permission: &str) -> Result<bool> {
        self.provider.find_permission(permission)
    }

    #[instrument(skip(self))]
    fn assign_role(&self, principal: PrincipalId, role: &str) -> Result<()> {
        self.require_role(role)?;
        self.provider.assign_role(principal, role).map_err(|e| {
            error!(principal, role, "Provider failed to assign role: {}", e);
            e
        })
    }

    fn remove_role(&self, principal: PrincipalId, role: &str) -> bool {
        let result = self.provider.find_role(role).and_then(|exists| {
            if exists {
                self.provider.remove_role(principal, role)
            } else {
                Ok(false)
            }
        });

        result.unwrap_or_else(|e| {
            error!(principal, role, "Provider failed to remove role: {}", e);
            false
        })
    }

    fn has_role(&self, principal: PrincipalId, role: &str) -> Result<bool> {
        Ok(self.provider.roles_of(principal)?.contains(role))
    }

    #[instrument(skip(self))]
    fn has_permission(&self, principal: PrincipalId, permission: &str) -> Result<bool> {
        self.require_permission(permission)?;
        self.provider.has_permission_to(principal, permission)
    }

    fn roles_of(&self, principal: PrincipalId) -> Result<Vec<String>> {
        Ok(self.provider.roles_of(principal)?.into_iter().collect())
    }

    fn create_role(&self, role: &str) -> Result<()> {
        self.provider.create_role(role)
    }

    fn create_permission(&self, permission: &str) -> Result<()> {
        self.provider.create_permission(permission)
    }

    fn grant_permission(&self, role: &str, permission: &str) -> Result<()> {
        self.require_role(role)?;
        self.require_permission(permission)?;
        self.provider.give_permission_to_role(role, permission)
    }

    fn revoke_permission(&self, role: &str, permission: &str) -> Result<bool> {
        self.require_role(role)?;
        self.require_permission(permission)?;
        self.provider.revoke_permission_from_role(role, permission)
    }

    fn role_permissions(&self, role: &str) -> Result<Vec<String>> {
        self.require_role(role)?;
        Ok(self.provider.permissions_of_role(role)?.into_iter().collect())
    }

    fn supports_direct_grants(&self) -> bool {
        true
    }

    fn give_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<()> {
        self.require_permission(permission)?;
        self.provider.give_permission_to(principal, permission)
    }

    fn revoke_permission_from(&self, principal: PrincipalId, permission: &str) -> Result<bool> {
        self.require_permission(permission)?;
        self.provider.revoke_permission_to(principal, permission)
    }
}

/// In-process [`RbacProvider`]
#[derive(Debug, Default)]
pub struct MemoryProvider {
    roles: DashMap<String, BTreeSet<String>>,
    permissions: DashSet<String>,
    assignments: DashMap<PrincipalId, BTreeSet<String>>,
    direct: DashMap<PrincipalId, BTreeSet<String>>,
}

impl MemoryProvider {
    /// Empty provider
    pub fn new() -> Self {
        Self::default()
    }
}

impl RbacProvider for MemoryProvider {
    fn find_role(&self, role: &str) -> Result<bool> {
        Ok(self.roles.contains_key(role))
    }

    fn find_permission(&self, permission: &str) -> Result<bool> {
        Ok(self.permissions.contains(permission))
    }

    fn create_role(&self, role: &str) -> Result<()> {
        self.roles.entry(role.to_string()).or_default();
        Ok(())
    }

    fn create_permission(&self, permission: &str) -> Result<()> {
        self.permissions.insert(permission.to_string());
        Ok(())
    }

    fn assign_role(&self, principal: PrincipalId, role: &str) -> Result<()> {
        self.assignments
            .entry(principal)
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    fn remove_role(&self, principal: PrincipalId, role: &str) -> Result<bool> {
        Ok(self
            .assignments
            .get_mut(&principal)
            .map(|mut roles| roles.remove(role))
            .unwrap_or(false))
    }

    fn roles_of(&self, principal: PrincipalId) -> Result<BTreeSet<String>> {
        Ok(self
            .assignments
            .get(&principal)
            .map(|roles| roles.clone())
            .unwrap_or_default())
    }

    fn has_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<bool> {
        let direct = self
            .direct
            .get(&principal)
            .is_some_and(|grants| grants.contains(permission));
        if direct {
            return Ok(true);
        }

        let held = self.roles_of(principal)?;
        Ok(held.iter().any(|role| {
            self.roles
                .get(role)
                .is_some_and(|perms| perms.contains(permission))
        }))
    }

    fn give_permission_to_role(&self, role: &str, permission: &str) -> Result<()> {
        self.roles
            .entry(role.to_string())
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    fn revoke_permission_from_role(&self, role: &str, permission: &str) -> Result<bool> {
        Ok(self
            .roles
            .get_mut(role)
            .map(|mut perms| perms.remove(permission))
            .unwrap_or(false))
    }

    fn permissions_of_role(&self, role: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .roles
            .get(role)
            .map(|perms| perms.clone())
            .unwrap_or_default())
    }

    fn give_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<()> {
        self.direct
            .entry(principal)
            .or_default()
            .insert(permission.to_string());
        Ok(())
    }

    fn revoke_permission_to(&self, principal: PrincipalId, permission: &str) -> Result<bool> {
        Ok(self
            .direct
            .get_mut(&principal)
            .map(|mut grants| grants.remove(permission))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DelegatedRbacStore<MemoryProvider> {
        let store = DelegatedRbacStore::new(MemoryProvider::new());
        store.create_role("admin").unwrap();
        store.create_permission("edit-users").unwrap();
        store.grant_permission("admin", "edit-users").unwrap();
        store
    }

    #[test]
    fn test_unknown_role_is_not_created() {
        let store = store();
        let err = store.assign_role(1, "editor").unwrap_err();
        assert!(matches!(err, GatehouseError::RoleNotFound(r) if r == "editor"));
        assert!(!store.role_exists("editor").unwrap());
    }

    #[test]
    fn test_assign_and_check() {
        let store = store();
        store.assign_role(1, "admin").unwrap();
        store.assign_role(1, "admin").unwrap();

        assert!(store.has_role(1, "admin").unwrap());
        assert!(store.has_permission(1, "edit-users").unwrap());
        assert_eq!(store.roles_of(1).unwrap(), vec!["admin".to_string()]);

        assert!(store.remove_role(1, "admin"));
        assert!(!store.remove_role(1, "admin"));
        assert!(!store.remove_role(1, "ghost"));
        assert!(!store.has_permission(1, "edit-users").unwrap());
    }

    #[test]
    fn test_direct_grants() {
        let store = store();
        assert!(!store.has_permission(5, "edit-users").unwrap());

        store.give_permission_to(5, "edit-users").unwrap();
        assert!(store.has_permission(5, "edit-users").unwrap());

        assert!(store.revoke_permission_from(5, "edit-users").unwrap());
        assert!(!store.has_permission(5, "edit-users").unwrap());

        assert!(matches!(
            store.give_permission_to(5, "fly"),
            Err(GatehouseError::PermissionNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_permission() {
        let store = store();
        assert!(matches!(
            store.has_permission(1, "delete-users"),
            Err(GatehouseError::PermissionNotFound(_))
        ));
    }
}
