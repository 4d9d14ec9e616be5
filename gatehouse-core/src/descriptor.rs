//! Rule, field and role descriptors
//!
//! Descriptors are the declarative metadata attached to operations and entity
//! types. They are immutable once built and are shared process-wide behind the
//! registry's `Arc`.

use crate::error::{GatehouseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wildcard keyword accepted wherever a requirement can be relaxed
pub const ALL: &str = "all";

/// A permission, role or user-type requirement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Requirement {
    /// No requirement ("all")
    #[default]
    Any,
    /// A specific named permission, role or user type
    Named(String),
}

impl Requirement {
    /// Build a requirement from its declared name; `"all"` relaxes it
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == ALL {
            Requirement::Any
        } else {
            Requirement::Named(name)
        }
    }

    /// The required name, or `None` for `all`
    pub fn name(&self) -> Option<&str> {
        match self {
            Requirement::Any => None,
            Requirement::Named(name) => Some(name),
        }
    }

    /// True when the requirement is `all`
    pub fn is_any(&self) -> bool {
        matches!(self, Requirement::Any)
    }
}

impl From<String> for Requirement {
    fn from(name: String) -> Self {
        Requirement::named(name)
    }
}

impl From<&str> for Requirement {
    fn from(name: &str) -> Self {
        Requirement::named(name)
    }
}

impl From<Requirement> for String {
    fn from(req: Requirement) -> Self {
        req.to_string()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or(ALL))
    }
}

/// Route context a rule is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteContext {
    /// Any request
    #[default]
    All,
    /// API requests only
    Api,
    /// Web requests only
    Web,
    /// Nobody, ever
    Block,
}

impl RouteContext {
    /// Keyword used in declarations
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteContext::All => "all",
            RouteContext::Api => "api",
            RouteContext::Web => "web",
            RouteContext::Block => "block",
        }
    }
}

impl FromStr for RouteContext {
    type Err = GatehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(RouteContext::All),
            "api" => Ok(RouteContext::Api),
            "web" => Ok(RouteContext::Web),
            "block" => Ok(RouteContext::Block),
            other => Err(GatehouseError::InvalidDescriptor(format!(
                "Route type must be one of: all, api, web, block (got '{}')",
                other
            ))),
        }
    }
}

impl TryFrom<String> for RouteContext {
    type Error = GatehouseError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RouteContext> for String {
    fn from(ctx: RouteContext) -> Self {
        ctx.as_str().to_string()
    }
}

impl fmt::Display for RouteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One authorization requirement attached to a type or operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// Required permission
    #[serde(default)]
    pub permission: Requirement,
    /// Required role
    #[serde(default)]
    pub role: Requirement,
    /// Required user type; filters the permission and role clauses
    #[serde(default, rename = "user_type", alias = "userType")]
    pub user_type: Requirement,
    /// Route context restriction
    #[serde(default, rename = "route", alias = "route_type", alias = "routeType")]
    pub route: RouteContext,
}

impl RuleDescriptor {
    /// A rule with every requirement relaxed
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from declared strings, validating the route context
    pub fn from_parts(
        permission: &str,
        role: &str,
        user_type: &str,
        route: &str,
    ) -> Result<Self> {
        Ok(RuleDescriptor {
            permission: Requirement::named(permission),
            role: Requirement::named(role),
            user_type: Requirement::named(user_type),
            route: route.parse()?,
        })
    }

    /// Require a permission
    pub fn permission(mut self, name: impl Into<String>) -> Self {
        self.permission = Requirement::named(name);
        self
    }

    /// Require a role
    pub fn role(mut self, name: impl Into<String>) -> Self {
        self.role = Requirement::named(name);
        self
    }

    /// Require a user type
    pub fn user_type(mut self, name: impl Into<String>) -> Self {
        self.user_type = Requirement::named(name);
        self
    }

    /// Restrict to a route context
    pub fn route(mut self, route: RouteContext) -> Self {
        self.route = route;
        self
    }

    /// Shorthand for a rule that blocks the target outright
    pub fn blocked() -> Self {
        Self::new().route(RouteContext::Block)
    }
}

impl fmt::Display for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "permission={} role={} user_type={} route={}",
            self.permission, self.role, self.user_type, self.route
        )
    }
}

/// Supported dynamic field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    /// Any string
    #[default]
    String,
    /// Numeric value or numeric string
    Integer,
    /// `true`, `false`, `0`, `1`, `"0"`, `"1"`
    Boolean,
    /// Parseable timestamp
    Date,
}

impl FieldType {
    /// Keyword used in declarations and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
        }
    }
}

impl FromStr for FieldType {
    type Err = GatehouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(FieldType::String),
            "integer" => Ok(FieldType::Integer),
            "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            other => Err(GatehouseError::InvalidDescriptor(format!(
                "Unsupported field type '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = GatehouseError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema entry for one dynamic user attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, non-empty
    pub name: String,
    /// Value type
    #[serde(default, rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present
    #[serde(default)]
    pub required: bool,
    /// Whether the value must be unique across principals
    #[serde(default)]
    pub unique: bool,
}

impl FieldDescriptor {
    /// Create an optional, non-unique field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(GatehouseError::InvalidDescriptor(
                "Field name must not be empty".into(),
            ));
        }

        Ok(FieldDescriptor {
            name,
            field_type,
            required: false,
            unique: false,
        })
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the field as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A role declared on the user entity, with the permissions it carries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleDeclaration {
    /// Role name
    pub name: String,
    /// Permission names
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl RoleDeclaration {
    /// Declare a role
    pub fn new(name: impl Into<String>, permissions: &[&str]) -> Self {
        RoleDeclaration {
            name: name.into(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}
