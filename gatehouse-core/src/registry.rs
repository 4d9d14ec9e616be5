//! Metadata registry: explicit registration and lookup of descriptors
//!
//! Every entity or handler type registers its rules, fields and roles once at
//! startup through [`RegistryBuilder`]. The resulting [`MetadataRegistry`] is
//! immutable and keyed by type name; lookups never construct the target.

use crate::descriptor::{FieldDescriptor, RoleDeclaration, RuleDescriptor};
use crate::error::{GatehouseError, Result};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// What to do when an entity declares the same field name twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateFieldPolicy {
    /// Later declaration replaces the earlier one (logged)
    #[default]
    Override,
    /// Registration fails with `DuplicateField`
    Reject,
}

/// Identity of a type, optionally narrowed to one of its operations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    /// Type name, e.g. `UserController`
    pub type_name: String,
    /// Operation name, e.g. `store`
    #[serde(default)]
    pub member: Option<String>,
}

impl TargetRef {
    /// Reference a type as a whole
    pub fn class(type_name: impl Into<String>) -> Self {
        TargetRef {
            type_name: type_name.into(),
            member: None,
        }
    }

    /// Reference an operation on a type
    pub fn member(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        TargetRef {
            type_name: type_name.into(),
            member: Some(member.into()),
        }
    }
}

impl FromStr for TargetRef {
    type Err = GatehouseError;

    /// Parses `Type` or `Type::member`
    fn from_str(s: &str) -> Result<Self> {
        let (type_name, member) = match s.split_once("::") {
            Some((t, m)) => (t.trim(), Some(m.trim())),
            None => (s.trim(), None),
        };

        if type_name.is_empty() || member.is_some_and(str::is_empty) {
            return Err(GatehouseError::InvalidDescriptor(format!(
                "Invalid target '{}', expected Type or Type::member",
                s
            )));
        }

        Ok(TargetRef {
            type_name: type_name.to_string(),
            member: member.map(str::to_string),
        })
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{}::{}", self.type_name, member),
            None => f.write_str(&self.type_name),
        }
    }
}

/// Ordered field name to descriptor mapping for one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the field is declared
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when nothing is declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace in place; returns the replaced descriptor
    fn upsert(&mut self, field: FieldDescriptor) -> Option<FieldDescriptor> {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => Some(std::mem::replace(existing, field)),
            None => {
                self.fields.push(field);
                None
            }
        }
    }
}

impl FromIterator<FieldDescriptor> for FieldSchema {
    fn from_iter<I: IntoIterator<Item = FieldDescriptor>>(iter: I) -> Self {
        let mut schema = FieldSchema::default();
        for field in iter {
            schema.upsert(field);
        }
        schema
    }
}

/// Everything declared on one type
#[derive(Debug, Clone, Default)]
struct TypeEntry {
    rules: Vec<RuleDescriptor>,
    members: AHashMap<String, Vec<RuleDescriptor>>,
    fields: FieldSchema,
    roles: Vec<RoleDeclaration>,
}

/// Immutable lookup table of declared metadata
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    types: AHashMap<String, TypeEntry>,
}

impl MetadataRegistry {
    /// Start registering metadata
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Rules for a target: class-level first, then member-level
    pub fn rules_for(&self, target: &TargetRef) -> Result<Vec<RuleDescriptor>> {
        let entry = self.entry(&target.type_name)?;

        let mut rules = entry.rules.clone();
        if let Some(member) = &target.member {
            if let Some(member_rules) = entry.members.get(member) {
                rules.extend(member_rules.iter().cloned());
            }
        }

        Ok(rules)
    }

    /// Field schema declared on an entity type
    pub fn fields_for(&self, entity: &str) -> Result<&FieldSchema> {
        Ok(&self.entry(entity)?.fields)
    }

    /// Roles declared on an entity type
    pub fn roles_for(&self, entity: &str) -> Result<&[RoleDeclaration]> {
        Ok(&self.entry(entity)?.roles)
    }

    /// Find a declared role on an entity type
    pub fn declared_role(&self, entity: &str, role: &str) -> Option<&RoleDeclaration> {
        self.types
            .get(entity)
            .and_then(|e| e.roles.iter().find(|r| r.name == role))
    }

    /// Whether a type is registered
    pub fn contains_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Member names carrying rules on a type, sorted
    pub fn members_of(&self, type_name: &str) -> Result<Vec<&str>> {
        let mut members: Vec<&str> = self
            .entry(type_name)?
            .members
            .keys()
            .map(String::as_str)
            .collect();
        members.sort_unstable();
        Ok(members)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn entry(&self, type_name: &str) -> Result<&TypeEntry> {
        self.types
            .get(type_name)
            .ok_or_else(|| GatehouseError::TargetNotFound(type_name.to_string()))
    }
}

/// Collects declarations and freezes them into a [`MetadataRegistry`]
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    duplicate_fields: DuplicateFieldPolicy,
    types: AHashMap<String, TypeEntry>,
}

impl RegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duplicate field policy
    pub fn with_duplicate_policy(mut self, policy: DuplicateFieldPolicy) -> Self {
        self.duplicate_fields = policy;
        self
    }

    /// Register a type that may carry no metadata at all
    pub fn declare_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.types.entry(type_name.into()).or_default();
        self
    }

    /// Attach a rule to a type
    pub fn class_rule(&mut self, type_name: impl Into<String>, rule: RuleDescriptor) -> &mut Self {
        self.types.entry(type_name.into()).or_default().rules.push(rule);
        self
    }

    /// Attach a rule to one operation of a type
    pub fn member_rule(
        &mut self,
        type_name: impl Into<String>,
        member: impl Into<String>,
        rule: RuleDescriptor,
    ) -> &mut Self {
        self.types
            .entry(type_name.into())
            .or_default()
            .members
            .entry(member.into())
            .or_default()
            .push(rule);
        self
    }

    /// Declare a dynamic field on an entity type
    pub fn field(&mut self, entity: impl Into<String>, field: FieldDescriptor) -> Result<&mut Self> {
        let entity = entity.into();
        if field.name.trim().is_empty() {
            return Err(GatehouseError::InvalidDescriptor(format!(
                "Field on {} has an empty name",
                entity
            )));
        }

        let entry = self.types.entry(entity.clone()).or_default();
        if self.duplicate_fields == DuplicateFieldPolicy::Reject && entry.fields.contains(&field.name)
        {
            return Err(GatehouseError::DuplicateField {
                entity,
                field: field.name,
            });
        }

        let name = field.name.clone();
        if let Some(previous) = entry.fields.upsert(field) {
            warn!(
                entity = %entity,
                field = %name,
                previous_type = %previous.field_type,
                "Duplicate field declaration, later declaration wins"
            );
        }

        Ok(self)
    }

    /// Declare a role on an entity type; a later declaration of the same name replaces it
    pub fn role(&mut self, entity: impl Into<String>, role: RoleDeclaration) -> &mut Self {
        let roles = &mut self.types.entry(entity.into()).or_default().roles;
        match roles.iter_mut().find(|r| r.name == role.name) {
            Some(existing) => *existing = role,
            None => roles.push(role),
        }
        self
    }

    /// Freeze the declarations
    pub fn build(self) -> MetadataRegistry {
        debug!("Metadata registry built with {} types", self.types.len());
        MetadataRegistry { types: self.types }
    }
}
