//! User lifecycle: records, dynamic fields, user types and roles

use crate::cache::DescriptorCache;
use crate::config::GatehouseConfig;
use crate::db::{Database, StoreError, UserRow};
use crate::error::{GatehouseError, Result};
use crate::fields::{FieldError, FieldErrorKind, FieldPersistence, FieldLookup, FieldValidator};
use crate::rbac::RbacStore;
use crate::registry::FieldSchema;
use crate::types::{Actor, Payload, PrincipalId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Columns stored on the user row itself
pub const STANDARD_FIELDS: [&str; 4] = ["name", "email", "password", "remember_token"];

/// A user with its dynamic field values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Principal id
    pub id: PrincipalId,
    /// Display name
    pub name: String,
    /// Email
    pub email: String,
    /// Stored password
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Assigned user type
    pub user_type: Option<String>,
    /// Declared dynamic fields that have values
    pub dynamic_fields: Payload,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Soft deletion time
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// The actor this user authorizes as
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            user_type: self.user_type.clone(),
        }
    }

    /// Value of a dynamic field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.dynamic_fields.get(name)
    }
}

/// Creates, updates and queries users
pub struct UserManager {
    db: Arc<Database>,
    descriptors: Arc<DescriptorCache>,
    rbac: Arc<dyn RbacStore>,
    persistence: Arc<FieldPersistence>,
    validator: FieldValidator,
    user_entity: String,
    dynamic_fields: bool,
    soft_deletes: bool,
}

impl UserManager {
    /// Build a manager over shared components
    pub fn new(
        config: &GatehouseConfig,
        db: Arc<Database>,
        descriptors: Arc<DescriptorCache>,
        rbac: Arc<dyn RbacStore>,
    ) -> Self {
        let persistence = Arc::new(FieldPersistence::new(db.clone()));
        let validator = FieldValidator::new(persistence.clone());

        UserManager {
            db,
            descriptors,
            rbac,
            persistence,
            validator,
            user_entity: config.user_entity.clone(),
            dynamic_fields: config.enable_dynamic_fields,
            soft_deletes: config.soft_deletes,
        }
    }

    /// Declared dynamic fields of the user entity; empty when none are declared
    pub fn schema(&self) -> Result<FieldSchema> {
        let registry = self.descriptors.get()?;
        match registry.fields_for(&self.user_entity) {
            Ok(schema) => Ok(schema.clone()),
            Err(GatehouseError::TargetNotFound(_)) => Ok(FieldSchema::default()),
            Err(e) => Err(e),
        }
    }

    /// Create a user from a payload of standard and dynamic fields
    #[instrument(skip(self, payload))]
    pub fn create(&self, payload: &Payload) -> Result<User> {
        let schema = self.schema()?;

        let mut errors = Vec::new();
        let name = required_string(payload, "name", &mut errors);
        let email = required_string(payload, "email", &mut errors);
        let password = required_string(payload, "password", &mut errors);
        self.collect_dynamic_errors(&schema, payload, None, &mut errors)?;
        if !errors.is_empty() {
            return Err(GatehouseError::FieldValidationFailed(errors));
        }

        let mut row = UserRow::new(name, email, password);
        row.remember_token = optional_string(payload, "remember_token");

        let id = match self.db.users().insert(row) {
            Ok(id) => id,
            Err(StoreError::Duplicate { .. }) => {
                return Err(GatehouseError::FieldValidationFailed(vec![FieldError::new(
                    "email",
                    FieldErrorKind::Unique,
                )]))
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.persistence.save(id, &schema, &self.dynamic_values(&schema, payload)) {
            return Err(self.undo_create(id, e));
        }

        info!(user = id, "Created user");
        self.require(id)
    }

    /// Update standard and dynamic fields of an existing user
    ///
    /// Stored dynamic values count towards required fields, so a partial
    /// payload only has to satisfy the fields it touches.
    #[instrument(skip(self, payload))]
    pub fn update(&self, id: PrincipalId, payload: &Payload) -> Result<User> {
        let current = self.require(id)?;
        let schema = self.schema()?;

        let mut errors = Vec::new();
        for field in ["name", "email", "password"] {
            if let Some(value) = payload.get(field) {
                if value.as_str().map_or(true, str::is_empty) {
                    errors.push(FieldError::new(field, FieldErrorKind::Required));
                }
            }
        }

        let mut merged = current.dynamic_fields.clone();
        for (name, value) in payload {
            if schema.contains(name) {
                merged.insert(name.clone(), value.clone());
            }
        }
        self.collect_dynamic_errors(&schema, &merged, Some(id), &mut errors)?;
        if !errors.is_empty() {
            return Err(GatehouseError::FieldValidationFailed(errors));
        }

        let result = self.db.users().update(id, |user| {
            if let Some(name) = optional_string(payload, "name") {
                user.name = name;
            }
            if let Some(email) = optional_string(payload, "email") {
                user.email = email;
            }
            if let Some(password) = optional_string(payload, "password") {
                user.password = password;
            }
            if payload.contains_key("remember_token") {
                user.remember_token = optional_string(payload, "remember_token");
            }
            user.updated_at = Utc::now();
        });

        match result {
            Ok(_) => {}
            Err(StoreError::Duplicate { .. }) => {
                return Err(GatehouseError::FieldValidationFailed(vec![FieldError::new(
                    "email",
                    FieldErrorKind::Unique,
                )]))
            }
            Err(e) => return Err(e.into()),
        }

        self.persistence.save(id, &schema, &self.dynamic_values(&schema, payload))?;
        debug!(user = id, "Updated user");
        self.require(id)
    }

    /// Delete a user; soft when soft deletes are enabled
    pub fn delete(&self, id: PrincipalId) -> bool {
        if !self.soft_deletes {
            return self.force_delete(id);
        }

        match self.db.users().update(id, |user| {
            if user.deleted_at.is_none() {
                user.deleted_at = Some(Utc::now());
            }
        }) {
            Ok(_) => {
                info!(user = id, "Soft deleted user");
                true
            }
            Err(e) => {
                error!(user = id, "Failed to delete user: {}", e);
                false
            }
        }
    }

    /// Remove a user with its dynamic fields and role assignments
    pub fn force_delete(&self, id: PrincipalId) -> bool {
        let result = (|| -> Result<bool> {
            let removed = self.db.users().delete(id)?.is_some();
            if removed {
                self.persistence.delete_for(id)?;
                self.db.user_roles().delete_where(|r| r.user_id == id)?;
            }
            Ok(removed)
        })();

        match result {
            Ok(removed) => {
                if removed {
                    info!(user = id, "Permanently deleted user");
                }
                removed
            }
            Err(e) => {
                error!(user = id, "Failed to force delete user: {}", e);
                false
            }
        }
    }

    /// Undo a soft delete
    pub fn restore(&self, id: PrincipalId) -> bool {
        if !self.soft_deletes {
            warn!(user = id, "Restore requested but soft deletes are disabled");
            return false;
        }

        match self.db.users().update(id, |user| user.deleted_at = None) {
            Ok(_) => true,
            Err(e) => {
                error!(user = id, "Failed to restore user: {}", e);
                false
            }
        }
    }

    /// A user that is not soft deleted
    pub fn find(&self, id: PrincipalId) -> Result<Option<User>> {
        match self.db.users().get(id)? {
            Some(row) if !row.is_trashed() => Ok(Some(self.hydrate(id, row)?)),
            _ => Ok(None),
        }
    }

    /// A user, including soft deleted ones
    pub fn find_with_trashed(&self, id: PrincipalId) -> Result<Option<User>> {
        match self.db.users().get(id)? {
            Some(row) => Ok(Some(self.hydrate(id, row)?)),
            None => Ok(None),
        }
    }

    /// All users that are not soft deleted, in id order
    pub fn all(&self) -> Result<Vec<User>> {
        self.db
            .users()
            .select(|u| !u.is_trashed())?
            .into_iter()
            .map(|(id, row)| self.hydrate(id, row))
            .collect()
    }

    /// Users whose standard or dynamic field equals `value`
    ///
    /// Undeclared fields match nobody.
    pub fn where_field(&self, field: &str, value: &Value) -> Result<Vec<User>> {
        let rows = match field {
            "name" | "email" | "user_type" => {
                let wanted = value.as_str();
                self.db.users().select(|u| {
                    let actual = match field {
                        "name" => Some(u.name.as_str()),
                        "email" => Some(u.email.as_str()),
                        _ => u.user_type.as_deref(),
                    };
                    !u.is_trashed() && wanted.is_some() && actual == wanted
                })?
            }
            _ if self.schema()?.contains(field) => {
                let ids: BTreeSet<PrincipalId> =
                    self.persistence.principals_with(field, value)?.into_iter().collect();
                self.db
                    .users()
                    .select(|_| true)?
                    .into_iter()
                    .filter(|(id, u)| ids.contains(id) && !u.is_trashed())
                    .collect()
            }
            _ => Vec::new(),
        };

        rows.into_iter().map(|(id, row)| self.hydrate(id, row)).collect()
    }

    /// Assign a user type
    pub fn set_user_type(&self, id: PrincipalId, user_type: &str) -> Result<()> {
        self.update_row(id, |user| user.user_type = Some(user_type.to_string()))
    }

    /// Current user type
    pub fn get_user_type(&self, id: PrincipalId) -> Result<Option<String>> {
        Ok(self.require(id)?.user_type)
    }

    /// Clear the user type
    pub fn remove_user_type(&self, id: PrincipalId) -> Result<()> {
        self.update_row(id, |user| user.user_type = None)
    }

    /// Whether the user has exactly this type
    pub fn is_user_type(&self, id: PrincipalId, user_type: &str) -> Result<bool> {
        Ok(self.get_user_type(id)?.as_deref() == Some(user_type))
    }

    /// Whether the user has any of these types
    pub fn is_any_user_type(&self, id: PrincipalId, user_types: &[&str]) -> Result<bool> {
        let current = self.get_user_type(id)?;
        Ok(current.is_some_and(|t| user_types.contains(&t.as_str())))
    }

    /// Actor for authorizing requests made by this user
    pub fn actor(&self, id: PrincipalId) -> Result<Actor> {
        Ok(self.require(id)?.actor())
    }

    /// Give the user a role
    pub fn assign_role(&self, id: PrincipalId, role: &str) -> Result<()> {
        self.require(id)?;
        self.rbac.assign_role(id, role)
    }

    /// Take a role away
    pub fn remove_role(&self, id: PrincipalId, role: &str) -> bool {
        self.rbac.remove_role(id, role)
    }

    /// Whether the user holds a role
    pub fn has_role(&self, id: PrincipalId, role: &str) -> Result<bool> {
        self.rbac.has_role(id, role)
    }

    /// Whether the user holds a permission
    pub fn has_permission(&self, id: PrincipalId, permission: &str) -> Result<bool> {
        self.rbac.has_permission(id, permission)
    }

    /// Roles held by the user
    pub fn roles(&self, id: PrincipalId) -> Result<Vec<String>> {
        self.rbac.roles_of(id)
    }

    fn require(&self, id: PrincipalId) -> Result<User> {
        self.find(id)?.ok_or(GatehouseError::UserNotFound(id))
    }

    fn update_row(&self, id: PrincipalId, f: impl FnOnce(&mut UserRow)) -> Result<()> {
        self.require(id)?;
        self.db.users().update(id, |user| {
            f(user);
            user.updated_at = Utc::now();
        })?;
        Ok(())
    }

    fn hydrate(&self, id: PrincipalId, row: UserRow) -> Result<User> {
        let dynamic_fields = if self.dynamic_fields {
            self.persistence.load(id, &self.schema()?)?
        } else {
            Payload::new()
        };

        Ok(User {
            id,
            name: row.name,
            email: row.email,
            password: row.password,
            user_type: row.user_type,
            dynamic_fields,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }

    /// Remove a user row whose dynamic fields failed to save
    fn undo_create(&self, id: PrincipalId, cause: GatehouseError) -> GatehouseError {
        error!(user = id, "Failed to save dynamic fields, rolling back: {}", cause);

        match self.db.users().delete(id) {
            Ok(_) => cause,
            Err(e) => {
                error!(user = id, "Rollback failed, user row left behind: {}", e);
                GatehouseError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(e.into()),
                }
            }
        }
    }

    fn collect_dynamic_errors(
        &self,
        schema: &FieldSchema,
        payload: &Payload,
        existing: Option<PrincipalId>,
        errors: &mut Vec<FieldError>,
    ) -> Result<()> {
        if !self.dynamic_fields {
            return Ok(());
        }

        match self.validator.validate(schema, payload, existing) {
            Ok(()) => Ok(()),
            Err(GatehouseError::FieldValidationFailed(found)) => {
                errors.extend(found);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn dynamic_values(&self, schema: &FieldSchema, payload: &Payload) -> Payload {
        if !self.dynamic_fields {
            return Payload::new();
        }

        payload
            .iter()
            .filter(|(name, _)| schema.contains(name) && !STANDARD_FIELDS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl std::fmt::Debug for UserManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserManager")
            .field("user_entity", &self.user_entity)
            .field("rbac", &self.rbac.backend_name())
            .field("storage", &self.persistence.mode())
            .field("soft_deletes", &self.soft_deletes)
            .finish()
    }
}

fn required_string(payload: &Payload, field: &str, errors: &mut Vec<FieldError>) -> String {
    match payload.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => {
            errors.push(FieldError::new(field, FieldErrorKind::Required));
            String::new()
        }
    }
}

fn optional_string(payload: &Payload, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::descriptor::{FieldDescriptor, FieldType};
    use crate::rbac::CustomRbacStore;
    use crate::registry::MetadataRegistry;

    fn manager_with(config: GatehouseConfig, embedded: bool) -> UserManager {
        let mut builder = MetadataRegistry::builder();
        builder
            .field(
                "User",
                FieldDescriptor::new("phone", FieldType::String).unwrap().required().unique(),
            )
            .unwrap()
            .field("User", FieldDescriptor::new("age", FieldType::Integer).unwrap())
            .unwrap();

        let db = Arc::new(Database::new(TableNames::default(), embedded));
        let rbac = Arc::new(CustomRbacStore::new(db.clone()));
        UserManager::new(&config, db, Arc::new(DescriptorCache::fixed(builder.build())), rbac)
    }

    fn manager() -> UserManager {
        manager_with(GatehouseConfig::default(), true)
    }

    fn ada() -> Payload {
        [
            ("name", Value::string("Ada")),
            ("email", Value::string("ada@example.com")),
            ("password", Value::string("secret")),
            ("phone", Value::string("555-0100")),
            ("age", Value::Integer(36)),
            ("nickname", Value::string("countess")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn test_create_splits_standard_and_dynamic() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        assert_eq!(user.name, "Ada");
        assert_eq!(user.field("phone"), Some(&Value::string("555-0100")));
        assert_eq!(user.field("age"), Some(&Value::Integer(36)));
        assert!(user.field("nickname").is_none());
        assert!(user.field("email").is_none());
    }

    #[test]
    fn test_create_collects_standard_and_dynamic_errors() {
        let manager = manager();
        let payload: Payload = [("name".to_string(), Value::string("Bob"))].into_iter().collect();

        let err = manager.create(&payload).unwrap_err();
        let fields: Vec<_> = err.field_errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["email", "password", "phone"]);
        assert!(manager.all().unwrap().is_empty());
    }

    #[test]
    fn test_unique_dynamic_field_excludes_self_on_update() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        let same_phone: Payload = [("phone".to_string(), Value::string("555-0100"))]
            .into_iter()
            .collect();
        assert!(manager.update(user.id, &same_phone).is_ok());

        let mut bob = ada();
        bob.insert("email".into(), Value::string("bob@example.com"));
        let err = manager.create(&bob).unwrap_err();
        assert_eq!(err.field_errors(), &[FieldError::new("phone", FieldErrorKind::Unique)]);
    }

    #[test]
    fn test_partial_update_keeps_required_fields() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        let payload: Payload = [("age".to_string(), Value::string("37"))].into_iter().collect();
        let updated = manager.update(user.id, &payload).unwrap();
        assert_eq!(updated.field("phone"), Some(&Value::string("555-0100")));
        assert_eq!(updated.field("age"), Some(&Value::Integer(37)));
    }

    #[test]
    fn test_failed_create_removes_user_row() {
        let manager = manager();
        let id = manager.db.users().insert(UserRow::new("Ada", "ada@example.com", "secret")).unwrap();

        let err = manager.undo_create(id, GatehouseError::UserNotFound(id));
        assert!(matches!(err, GatehouseError::UserNotFound(_)));
        assert!(manager.db.users().get(id).unwrap().is_none());
    }

    #[test]
    fn test_failed_rollback_reports_both_errors() {
        let manager = manager();
        let id = manager.db.users().insert(UserRow::new("Ada", "ada@example.com", "secret")).unwrap();

        manager.db.close();
        let err = manager.undo_create(id, GatehouseError::StoreUnavailable("write failed".into()));
        match err {
            GatehouseError::RollbackFailed { cause, rollback } => {
                assert!(matches!(*cause, GatehouseError::StoreUnavailable(_)));
                assert!(matches!(*rollback, GatehouseError::StoreUnavailable(_)));
            }
            other => panic!("expected RollbackFailed, got {:?}", other),
        }

        manager.db.reopen();
        assert!(manager.db.users().get(id).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_email() {
        let manager = manager();
        manager.create(&ada()).unwrap();

        let mut twin = ada();
        twin.insert("phone".into(), Value::string("555-0111"));
        let err = manager.create(&twin).unwrap_err();
        assert_eq!(err.field_errors(), &[FieldError::new("email", FieldErrorKind::Unique)]);
    }

    #[test]
    fn test_soft_delete_and_restore() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        assert!(manager.delete(user.id));
        assert!(manager.find(user.id).unwrap().is_none());
        assert!(manager.find_with_trashed(user.id).unwrap().unwrap().deleted_at.is_some());

        assert!(manager.restore(user.id));
        assert!(manager.find(user.id).unwrap().is_some());
    }

    #[test]
    fn test_hard_delete_cascades() {
        let config = GatehouseConfig {
            soft_deletes: false,
            ..GatehouseConfig::default()
        };
        let manager = manager_with(config, false);
        let user = manager.create(&ada()).unwrap();
        manager.assign_role(user.id, "admin").unwrap();

        assert!(manager.delete(user.id));
        assert!(!manager.delete(user.id));
        assert!(manager.find_with_trashed(user.id).unwrap().is_none());
        assert!(manager.db.user_fields().is_empty());
        assert!(manager.db.user_roles().is_empty());
        assert!(!manager.restore(user.id));
    }

    #[test]
    fn test_user_types() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        assert_eq!(manager.get_user_type(user.id).unwrap(), None);
        manager.set_user_type(user.id, "manager").unwrap();
        assert!(manager.is_user_type(user.id, "manager").unwrap());
        assert!(manager.is_any_user_type(user.id, &["staff", "manager"]).unwrap());
        assert_eq!(manager.actor(user.id).unwrap().user_type.as_deref(), Some("manager"));

        manager.remove_user_type(user.id).unwrap();
        assert!(!manager.is_any_user_type(user.id, &["manager"]).unwrap());
        assert!(matches!(
            manager.set_user_type(999, "manager"),
            Err(GatehouseError::UserNotFound(999))
        ));
    }

    #[test]
    fn test_where_field() {
        for embedded in [true, false] {
            let manager = manager_with(GatehouseConfig::default(), embedded);
            let user = manager.create(&ada()).unwrap();

            let found = manager.where_field("phone", &Value::string("555-0100")).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, user.id);

            assert_eq!(manager.where_field("email", &Value::string("ada@example.com")).unwrap().len(), 1);
            assert!(manager.where_field("nickname", &Value::string("countess")).unwrap().is_empty());
        }
    }

    #[test]
    fn test_dynamic_fields_disabled() {
        let config = GatehouseConfig {
            enable_dynamic_fields: false,
            ..GatehouseConfig::default()
        };
        let manager = manager_with(config, true);
        let mut payload = ada();
        payload.remove("phone");

        let user = manager.create(&payload).unwrap();
        assert!(user.dynamic_fields.is_empty());
    }

    #[test]
    fn test_roles_through_manager() {
        let manager = manager();
        let user = manager.create(&ada()).unwrap();

        manager.assign_role(user.id, "admin").unwrap();
        assert!(manager.has_role(user.id, "admin").unwrap());
        assert_eq!(manager.roles(user.id).unwrap(), vec!["admin".to_string()]);
        assert!(manager.remove_role(user.id, "admin"));
        assert!(matches!(
            manager.assign_role(42, "admin"),
            Err(GatehouseError::UserNotFound(42))
        ));
    }
}
