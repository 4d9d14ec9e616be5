//! Value and actor types shared across Gatehouse

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a principal (user row id)
pub type PrincipalId = u64;

/// Submitted payload: field name to value
pub type Payload = BTreeMap<String, Value>;

/// Dynamically typed value carried by payloads and dynamic fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Object/map of values
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Create a string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Create an array value
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// Create an object value
    pub fn object(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }

    /// Null, bool, number or string
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Borrow the string content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// The authenticated principal being authorized
///
/// Roles and permissions are not carried here; the evaluator asks the RBAC
/// store for them using `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// Principal id
    pub id: PrincipalId,
    /// User type, if one has been assigned
    #[serde(default)]
    pub user_type: Option<String>,
}

impl Actor {
    /// Create an actor with no user type
    pub fn new(id: PrincipalId) -> Self {
        Actor { id, user_type: None }
    }

    /// Set the actor's user type
    pub fn with_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.user_type = Some(user_type.into());
        self
    }

    /// Check the actor's user type against a name
    pub fn is_user_type(&self, user_type: &str) -> bool {
        self.user_type.as_deref() == Some(user_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_json() {
        let json = serde_json::json!({"age": 30, "ratio": 0.5, "tags": ["a"], "ok": true});
        let Value::Object(map) = Value::from(json) else {
            panic!("expected object");
        };
        assert_eq!(map["age"], Value::Integer(30));
        assert_eq!(map["ratio"], Value::Float(0.5));
        assert_eq!(map["tags"], Value::array(vec![Value::string("a")]));
        assert_eq!(map["ok"], Value::Bool(true));
    }

    #[test]
    fn test_untagged_deserialize() {
        let payload: Payload =
            serde_json::from_str(r#"{"name":"ada","age":36,"admin":false,"bio":null}"#).unwrap();
        assert_eq!(payload["name"], Value::string("ada"));
        assert_eq!(payload["age"], Value::Integer(36));
        assert_eq!(payload["admin"], Value::Bool(false));
        assert_eq!(payload["bio"], Value::Null);
    }

    #[test]
    fn test_actor_user_type() {
        let actor = Actor::new(7).with_user_type("manager");
        assert!(actor.is_user_type("manager"));
        assert!(!actor.is_user_type("user"));
        assert!(!Actor::new(7).is_user_type("user"));
    }

    #[test]
    fn test_primitive() {
        assert!(Value::Integer(1).is_primitive());
        assert!(Value::Null.is_primitive());
        assert!(!Value::array(vec![]).is_primitive());
    }
}
