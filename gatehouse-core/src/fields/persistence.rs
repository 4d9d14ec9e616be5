//! Dynamic field storage
//!
//! Values live either in the user's embedded `dynamic_fields` document or in
//! the `user_fields` side table, one text row per field.

use super::{coerce, FieldLookup};
use crate::db::{Database, StoreError, UserFieldRow};
use crate::descriptor::FieldType;
use crate::error::{GatehouseError, Result};
use crate::registry::FieldSchema;
use crate::types::{Payload, PrincipalId, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Where dynamic values are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// One document on the user row
    Embedded,
    /// One `user_fields` row per field
    SideTable,
}

/// Saves and loads dynamic field values
#[derive(Debug, Clone)]
pub struct FieldPersistence {
    db: Arc<Database>,
    mode: StorageMode,
}

impl FieldPersistence {
    /// Pick the storage mode from the users schema
    pub fn new(db: Arc<Database>) -> Self {
        let mode = if db.has_dynamic_fields_column() {
            StorageMode::Embedded
        } else {
            StorageMode::SideTable
        };
        FieldPersistence { db, mode }
    }

    /// Active storage mode
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Store values for a principal; existing keys are overwritten, others kept
    ///
    /// Declared fields are stored in the canonical form of their type, so both
    /// storage modes load back the same values. The write is all or nothing.
    #[instrument(skip(self, schema, values), fields(mode = ?self.mode, count = values.len()))]
    pub fn save(&self, principal: PrincipalId, schema: &FieldSchema, values: &Payload) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let values: Payload = values
            .iter()
            .map(|(name, value)| {
                let stored = match schema.get(name) {
                    Some(field) => coerce(field.field_type, value),
                    None => value.clone(),
                };
                (name.clone(), stored)
            })
            .collect();

        match self.mode {
            StorageMode::Embedded => self.save_embedded(principal, &values),
            StorageMode::SideTable => self.save_side_table(principal, &values),
        }
    }

    fn save_embedded(&self, principal: PrincipalId, values: &Payload) -> Result<()> {
        let result = self.db.users().update(principal, |user| {
            let doc = user.dynamic_fields.get_or_insert_with(Default::default);
            for (name, value) in values {
                doc.insert(name.clone(), value.clone());
            }
            user.updated_at = Utc::now();
        });

        match result {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => Err(GatehouseError::UserNotFound(principal)),
            Err(e) => Err(e.into()),
        }
    }

    fn save_side_table(&self, principal: PrincipalId, values: &Payload) -> Result<()> {
        let rows = values.iter().map(|(name, value)| UserFieldRow {
            user_id: principal,
            field_name: name.clone(),
            field_value: encode(value),
        });

        let written = self.db.user_fields().upsert_all(rows)?;
        debug!(principal, "Saved {} side-table fields", written);
        Ok(())
    }

    /// Stored values of the declared fields
    pub fn load(&self, principal: PrincipalId, schema: &FieldSchema) -> Result<Payload> {
        match self.mode {
            StorageMode::Embedded => {
                let user = self
                    .db
                    .users()
                    .get(principal)?
                    .ok_or(GatehouseError::UserNotFound(principal))?;
                let doc = user.dynamic_fields.unwrap_or_default();

                Ok(doc
                    .into_iter()
                    .filter(|(name, _)| schema.contains(name))
                    .collect())
            }
            StorageMode::SideTable => {
                let rows = self.db.user_fields().select(|r| r.user_id == principal)?;

                Ok(rows
                    .into_iter()
                    .filter_map(|(_, row)| {
                        let field = schema.get(&row.field_name)?;
                        Some((row.field_name, decode(row.field_value, field.field_type)))
                    })
                    .collect())
            }
        }
    }

    /// Remove every stored value of a principal
    pub fn delete_for(&self, principal: PrincipalId) -> Result<usize> {
        match self.mode {
            StorageMode::Embedded => Ok(0),
            StorageMode::SideTable => Ok(self.db.user_fields().delete_where(|r| r.user_id == principal)?),
        }
    }

    fn trashed(&self) -> Result<BTreeSet<PrincipalId>> {
        Ok(self
            .db
            .users()
            .select(|u| u.is_trashed())?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}

impl FieldLookup for FieldPersistence {
    fn principals_with(&self, field: &str, value: &Value) -> Result<Vec<PrincipalId>> {
        let needle = encode(value);

        match self.mode {
            StorageMode::Embedded => Ok(self
                .db
                .users()
                .select(|u| {
                    !u.is_trashed()
                        && u
                            .dynamic_fields
                            .as_ref()
                            .and_then(|doc| doc.get(field))
                            .is_some_and(|stored| encode(stored) == needle)
                })?
                .into_iter()
                .map(|(id, _)| id)
                .collect()),
            StorageMode::SideTable => {
                let trashed = self.trashed()?;
                Ok(self
                    .db
                    .user_fields()
                    .select(|r| r.field_name == field && r.field_value == needle)?
                    .into_iter()
                    .map(|(_, r)| r.user_id)
                    .filter(|id| !trashed.contains(id))
                    .collect())
            }
        }
    }
}

/// Canonical text form of a value; `None` for null
fn encode(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Inverse of [`encode`], guided by the declared type
fn decode(text: Option<String>, field_type: FieldType) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };

    if field_type != FieldType::String && (text.starts_with('[') || text.starts_with('{')) {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
            if json.is_array() || json.is_object() {
                return Value::from(json);
            }
        }
    }

    match field_type {
        FieldType::Integer => {
            if let Ok(i) = text.trim().parse::<i64>() {
                Value::Integer(i)
            } else if let Ok(f) = text.trim().parse::<f64>() {
                Value::Float(f)
            } else {
                Value::String(text)
            }
        }
        FieldType::Boolean => match text.as_str() {
            "1" => Value::Bool(true),
            "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        FieldType::String | FieldType::Date => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::db::UserRow;
    use crate::descriptor::FieldDescriptor;

    fn schema() -> FieldSchema {
        vec![
            FieldDescriptor::new("phone", FieldType::String).unwrap(),
            FieldDescriptor::new("age", FieldType::Integer).unwrap(),
            FieldDescriptor::new("subscribed", FieldType::Boolean).unwrap(),
            FieldDescriptor::new("born", FieldType::Date).unwrap(),
        ]
        .into_iter()
        .collect()
    }

    fn setup(embedded: bool) -> (Arc<Database>, FieldPersistence, PrincipalId) {
        let db = Arc::new(Database::new(TableNames::default(), embedded));
        let id = db
            .users()
            .insert(UserRow::new("Ada", "ada@example.com", "secret"))
            .unwrap();
        (db.clone(), FieldPersistence::new(db), id)
    }

    fn values() -> Payload {
        [
            ("phone".to_string(), Value::string("555-0100")),
            ("age".to_string(), Value::Integer(36)),
            ("subscribed".to_string(), Value::Bool(true)),
            ("born".to_string(), Value::string("1815-12-10")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_round_trip_both_modes() {
        for embedded in [true, false] {
            let (_, store, id) = setup(embedded);
            store.save(id, &schema(), &values()).unwrap();
            assert_eq!(store.load(id, &schema()).unwrap(), values(), "embedded={}", embedded);
        }
    }

    #[test]
    fn test_loose_values_load_back_identically_in_both_modes() {
        let loose: Payload = [
            ("age".to_string(), Value::string("42")),
            ("subscribed".to_string(), Value::Integer(1)),
        ]
        .into_iter()
        .collect();
        let expected: Payload = [
            ("age".to_string(), Value::Integer(42)),
            ("subscribed".to_string(), Value::Bool(true)),
        ]
        .into_iter()
        .collect();

        for embedded in [true, false] {
            let (_, store, id) = setup(embedded);
            store.save(id, &schema(), &loose).unwrap();
            assert_eq!(store.load(id, &schema()).unwrap(), expected, "embedded={}", embedded);
        }

        for embedded in [true, false] {
            let (_, store, id) = setup(embedded);
            let whole: Payload = [("age".to_string(), Value::Float(1.0))].into_iter().collect();
            store.save(id, &schema(), &whole).unwrap();
            assert_eq!(store.load(id, &schema()).unwrap()["age"], Value::Integer(1));
        }
    }

    #[test]
    fn test_side_table_save_on_closed_store_writes_nothing() {
        let (db, store, id) = setup(false);
        store.save(id, &schema(), &values()).unwrap();

        db.close();
        let update: Payload = [
            ("age".to_string(), Value::Integer(37)),
            ("phone".to_string(), Value::string("555-0199")),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            store.save(id, &schema(), &update),
            Err(GatehouseError::StoreUnavailable(_))
        ));

        db.reopen();
        assert_eq!(store.load(id, &schema()).unwrap(), values());
    }

    #[test]
    fn test_mode_follows_schema() {
        assert_eq!(setup(true).1.mode(), StorageMode::Embedded);
        assert_eq!(setup(false).1.mode(), StorageMode::SideTable);
    }

    #[test]
    fn test_side_table_upserts() {
        let (db, store, id) = setup(false);
        store.save(id, &schema(), &values()).unwrap();

        let update: Payload = [("age".to_string(), Value::Integer(37))].into_iter().collect();
        store.save(id, &schema(), &update).unwrap();

        assert_eq!(db.user_fields().len(), 4);
        assert_eq!(store.load(id, &schema()).unwrap()["age"], Value::Integer(37));
        assert_eq!(
            db.user_fields()
                .find(&(id, "subscribed".to_string()))
                .unwrap()
                .unwrap()
                .1
                .field_value
                .as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_embedded_merge_keeps_other_keys() {
        let (_, store, id) = setup(true);
        store.save(id, &schema(), &values()).unwrap();

        let update: Payload = [("phone".to_string(), Value::string("555-0199"))]
            .into_iter()
            .collect();
        store.save(id, &schema(), &update).unwrap();

        let loaded = store.load(id, &schema()).unwrap();
        assert_eq!(loaded["phone"], Value::string("555-0199"));
        assert_eq!(loaded["age"], Value::Integer(36));
    }

    #[test]
    fn test_non_primitive_values_are_json() {
        let (db, store, id) = setup(false);
        let tags: Payload = [(
            "age".to_string(),
            Value::array(vec![Value::Integer(1), Value::Integer(2)]),
        )]
        .into_iter()
        .collect();
        store.save(id, &schema(), &tags).unwrap();

        let row = db.user_fields().find(&(id, "age".to_string())).unwrap().unwrap().1;
        assert_eq!(row.field_value.as_deref(), Some("[1,2]"));
        assert_eq!(store.load(id, &schema()).unwrap()["age"], tags["age"]);
    }

    #[test]
    fn test_lookup_matches_encoded_value() {
        for embedded in [true, false] {
            let (db, store, id) = setup(embedded);
            store.save(id, &schema(), &values()).unwrap();

            assert_eq!(store.principals_with("age", &Value::string("36")).unwrap(), vec![id]);
            assert!(store.principals_with("age", &Value::Integer(35)).unwrap().is_empty());

            db.users().update(id, |u| u.deleted_at = Some(Utc::now())).unwrap();
            assert!(store.principals_with("age", &Value::Integer(36)).unwrap().is_empty());
        }
    }

    #[test]
    fn test_embedded_save_unknown_user() {
        let (_, store, _) = setup(true);
        assert!(matches!(
            store.save(999, &schema(), &values()),
            Err(GatehouseError::UserNotFound(999))
        ));
    }
}
