//! Relational RBAC backend

use super::RbacStore;
use crate::db::{Database, PermissionRow, RoleRow, RolePermissionRow, RowId, StoreError, UserRoleRow};
use crate::descriptor::RoleDeclaration;
use crate::error::{GatehouseError, Result};
use crate::types::PrincipalId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// RBAC over the `roles`, `permissions`, `user_roles` and `role_permissions` tables
///
/// Roles are created on first assignment. Roles declared on the user entity
/// count as existing before they have a row, and receive their declared
/// permissions when they are created.
#[derive(Debug)]
pub struct CustomRbacStore {
    db: Arc<Database>,
    declared: Vec<RoleDeclaration>,
}

impl CustomRbacStore {
    /// Store over a database
    pub fn new(db: Arc<Database>) -> Self {
        CustomRbacStore {
            db,
            declared: Vec::new(),
        }
    }

    /// Roles declared on the user entity
    pub fn with_declared_roles(mut self, declared: Vec<RoleDeclaration>) -> Self {
        self.declared = declared;
        self
    }

    fn declared(&self, role: &str) -> Option<&RoleDeclaration> {
        self.declared.iter().find(|r| r.name == role)
    }

    fn role_id(&self, role: &str) -> Result<Option<RowId>> {
        Ok(self.db.roles().find(&role.to_string())?.map(|(id, _)| id))
    }

    fn permission_id(&self, permission: &str) -> Result<Option<RowId>> {
        Ok(self
            .db
            .permissions()
            .find(&permission.to_string())?
            .map(|(id, _)| id))
    }

    /// Insert the role row, or return the row a concurrent writer created
    fn ensure_role(&self, role: &str) -> Result<RowId> {
        match self.db.roles().insert(RoleRow::new(role)) {
            Ok(id) => {
                debug!(role, "Created role");
                if let Some(decl) = self.declared(role) {
                    for permission in &decl.permissions {
                        self.create_permission(permission)?;
                        self.grant_permission(role, permission)?;
                    }
                }
                Ok(id)
            }
            Err(StoreError::Duplicate { .. }) => self
                .role_id(role)?
                .ok_or_else(|| GatehouseError::StoreUnavailable(format!("role '{}' vanished", role))),
            Err(e) => Err(e.into()),
        }
    }

    fn require_role(&self, role: &str) -> Result<RowId> {
        self.role_id(role)?
            .ok_or_else(|| GatehouseError::RoleNotFound(role.to_string()))
    }

    fn require_permission(&self, permission: &str) -> Result<RowId> {
        self.permission_id(permission)?
            .ok_or_else(|| GatehouseError::PermissionNotFound(permission.to_string()))
    }

    fn names_of_roles(&self, ids: &BTreeSet<RowId>) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .db
            .roles()
            .select(|_| true)?
            .into_iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(_, row)| row.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

impl RbacStore for CustomRbacStore {
    fn backend_name(&self) -> &'static str {
        "custom"
    }

    fn role_exists(&self, role: &str) -> Result<bool> {
        if self.declared(role).is_some() {
            return Ok(true);
        }
        Ok(self.role_id(role)?.is_some())
    }

    fn permission_exists(&self, permission: &str) -> Result<bool> {
        Ok(self.permission_id(permission)?.is_some())
    }

    #[instrument(skip(self))]
    fn assign_role(&self, principal: PrincipalId, role: &str) -> Result<()> {
        let result = self.ensure_role(role).and_then(|role_id| {
            match self.db.user_roles().insert(UserRoleRow {
                user_id: principal,
                role_id,
            }) {
                Ok(_) | Err(StoreError::Duplicate { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        });

        if let Err(e) = &result {
            error!(principal, role, "Failed to assign role: {}", e);
        }
        result
    }

    fn remove_role(&self, principal: PrincipalId, role: &str) -> bool {
        let result = self.role_id(role).and_then(|role_id| match role_id {
            Some(role_id) => Ok(self
                .db
                .user_roles()
                .delete_where(|r| r.user_id == principal && r.role_id == role_id)?
                > 0),
            None => Ok(false),
        });

        result.unwrap_or_else(|e| {
            error!(principal, role, "Failed to remove role: {}", e);
            false
        })
    }

    fn has_role(&self, principal: PrincipalId, role: &str) -> Result<bool> {
        match self.role_id(role)? {
            Some(role_id) => Ok(self.db.user_roles().find(&(principal, role_id))?.is_some()),
            None => Ok(false),
        }
    }

    #[instrument(skip(self))]
    fn has_permission(&self, principal: PrincipalId, permission: &str) -> Result<bool> {
        let permission_id = self.require_permission(permission)?;

        let role_ids: BTreeSet<RowId> = self
            .db
            .user_roles()
            .select(|r| r.user_id == principal)?
            .into_iter()
            .map(|(_, r)| r.role_id)
            .collect();

        if role_ids.is_empty() {
            return Ok(false);
        }

        Ok(self
            .db
            .role_permissions()
            .exists(|rp| rp.permission_id == permission_id && role_ids.contains(&rp.role_id))?)
    }

    fn roles_of(&self, principal: PrincipalId) -> Result<Vec<String>> {
        let ids: BTreeSet<RowId> = self
            .db
            .user_roles()
            .select(|r| r.user_id == principal)?
            .into_iter()
            .map(|(_, r)| r.role_id)
            .collect();
        self.names_of_roles(&ids)
    }

    fn create_role(&self, role: &str) -> Result<()> {
        self.ensure_role(role).map(|_| ())
    }

    fn create_permission(&self, permission: &str) -> Result<()> {
        match self.db.permissions().insert(PermissionRow::new(permission)) {
            Ok(_) | Err(StoreError::Duplicate { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn grant_permission(&self, role: &str, permission: &str) -> Result<()> {
        let role_id = self.require_role(role)?;
        let permission_id = self.require_permission(permission)?;

        match self.db.role_permissions().insert(RolePermissionRow {
            role_id,
            permission_id,
        }) {
            Ok(_) | Err(StoreError::Duplicate { .. }) => Ok(()),
            Err(e) => {
                error!(role, permission, "Failed to grant permission: {}", e);
                Err(e.into())
            }
        }
    }

    fn revoke_permission(&self, role: &str, permission: &str) -> Result<bool> {
        let role_id = self.require_role(role)?;
        let permission_id = self.require_permission(permission)?;

        match self
            .db
            .role_permissions()
            .delete_where(|rp| rp.role_id == role_id && rp.permission_id == permission_id)
        {
            Ok(removed) => Ok(removed > 0),
            Err(e) => {
                error!(role, permission, "Failed to revoke permission: {}", e);
                Err(e.into())
            }
        }
    }

    fn role_permissions(&self, role: &str) -> Result<Vec<String>> {
        let role_id = self.require_role(role)?;

        let ids: BTreeSet<RowId> = self
            .db
            .role_permissions()
            .select(|rp| rp.role_id == role_id)?
            .into_iter()
            .map(|(_, rp)| rp.permission_id)
            .collect();

        let mut names: Vec<String> = self
            .db
            .permissions()
            .select(|_| true)?
            .into_iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(_, p)| p.name)
            .collect();
        names.sort();
        Ok(names)
    }
}
