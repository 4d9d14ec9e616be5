//! In-process relational storage
//!
//! Each [`Table`] keeps its rows ordered by id plus one unique index. The
//! unique index is the only guard against duplicate rows: callers insert and
//! handle [`StoreError::Duplicate`] instead of checking first.

use crate::config::TableNames;
use crate::error::GatehouseError;
use crate::types::{PrincipalId, Value};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Row id
pub type RowId = u64;

/// Storage layer failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Unique constraint violated
    #[error("Duplicate entry in table '{table}'")]
    Duplicate {
        /// Table name
        table: String,
    },

    /// Row does not exist
    #[error("Row {id} not found in table '{table}'")]
    NotFound {
        /// Table name
        table: String,
        /// Row id
        id: RowId,
    },

    /// Storage cannot serve requests
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage result
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for GatehouseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate { .. } => GatehouseError::Conflict(err.to_string()),
            StoreError::NotFound { .. } | StoreError::Unavailable(_) => {
                GatehouseError::StoreUnavailable(err.to_string())
            }
        }
    }
}

/// A row type with a unique key
pub trait Record: Clone + Send + Sync {
    /// Unique key
    type Key: Eq + Hash + Clone + Debug + Send + Sync;

    /// Key of this row
    fn key(&self) -> Self::Key;
}

struct TableInner<R: Record> {
    rows: BTreeMap<RowId, R>,
    index: AHashMap<R::Key, RowId>,
}

/// Rows of one type with a unique index
pub struct Table<R: Record> {
    name: String,
    inner: RwLock<TableInner<R>>,
    next_id: AtomicU64,
    available: Arc<AtomicBool>,
}

impl<R: Record> Table<R> {
    fn new(name: impl Into<String>, available: Arc<AtomicBool>) -> Self {
        Table {
            name: name.into(),
            inner: RwLock::new(TableInner {
                rows: BTreeMap::new(),
                index: AHashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            available,
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "connection closed while accessing '{}'",
                self.name
            )))
        }
    }

    fn duplicate(&self) -> StoreError {
        StoreError::Duplicate {
            table: self.name.clone(),
        }
    }

    /// Insert a row, failing on a unique key collision
    pub fn insert(&self, row: R) -> StoreResult<RowId> {
        self.check()?;
        let mut inner = self.inner.write();

        let key = row.key();
        if inner.index.contains_key(&key) {
            return Err(self.duplicate());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        inner.index.insert(key, id);
        inner.rows.insert(id, row);
        Ok(id)
    }

    /// Insert or replace rows by unique key under one write lock
    ///
    /// Replaced rows keep their id. Either every row is written or none is.
    pub fn upsert_all(&self, rows: impl IntoIterator<Item = R>) -> StoreResult<usize> {
        self.check()?;
        let mut inner = self.inner.write();

        let mut written = 0;
        for row in rows {
            let key = row.key();
            let id = match inner.index.get(&key) {
                Some(id) => *id,
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    inner.index.insert(key, id);
                    id
                }
            };
            inner.rows.insert(id, row);
            written += 1;
        }
        Ok(written)
    }

    /// Row by id
    pub fn get(&self, id: RowId) -> StoreResult<Option<R>> {
        self.check()?;
        Ok(self.inner.read().rows.get(&id).cloned())
    }

    /// Row by unique key
    pub fn find(&self, key: &R::Key) -> StoreResult<Option<(RowId, R)>> {
        self.check()?;
        let inner = self.inner.read();
        Ok(inner
            .index
            .get(key)
            .and_then(|id| inner.rows.get(id).map(|row| (*id, row.clone()))))
    }

    /// Rows matching a predicate, in id order
    pub fn select(&self, pred: impl Fn(&R) -> bool) -> StoreResult<Vec<(RowId, R)>> {
        self.check()?;
        Ok(self
            .inner
            .read()
            .rows
            .iter()
            .filter(|(_, row)| pred(row))
            .map(|(id, row)| (*id, row.clone()))
            .collect())
    }

    /// Whether any row matches
    pub fn exists(&self, pred: impl Fn(&R) -> bool) -> StoreResult<bool> {
        self.check()?;
        Ok(self.inner.read().rows.values().any(pred))
    }

    /// Modify a row in place; a changed key is re-indexed
    pub fn update(&self, id: RowId, f: impl FnOnce(&mut R)) -> StoreResult<R> {
        self.check()?;
        let mut inner = self.inner.write();

        let mut row = match inner.rows.get(&id) {
            Some(row) => row.clone(),
            None => {
                return Err(StoreError::NotFound {
                    table: self.name.clone(),
                    id,
                })
            }
        };
        let old_key = row.key();
        f(&mut row);
        let new_key = row.key();

        if new_key != old_key {
            if inner.index.contains_key(&new_key) {
                return Err(self.duplicate());
            }
            inner.index.remove(&old_key);
            inner.index.insert(new_key, id);
        }

        inner.rows.insert(id, row.clone());
        Ok(row)
    }

    /// Remove a row by id
    pub fn delete(&self, id: RowId) -> StoreResult<Option<R>> {
        self.check()?;
        let mut inner = self.inner.write();
        let removed = inner.rows.remove(&id);
        if let Some(row) = &removed {
            inner.index.remove(&row.key());
        }
        Ok(removed)
    }

    /// Remove every row matching a predicate; returns the count
    pub fn delete_where(&self, pred: impl Fn(&R) -> bool) -> StoreResult<usize> {
        self.check()?;
        let mut inner = self.inner.write();
        let doomed: Vec<RowId> = inner
            .rows
            .iter()
            .filter(|(_, row)| pred(row))
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            if let Some(row) = inner.rows.remove(id) {
                inner.index.remove(&row.key());
            }
        }
        Ok(doomed.len())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.inner.read().rows.len()
    }

    /// True when the table holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Record> Debug for Table<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("rows", &self.len())
            .finish()
    }
}

/// `roles` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRow {
    /// Unique role name
    pub name: String,
    /// Guard name
    pub guard_name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RoleRow {
    /// New role with the default `web` guard
    pub fn new(name: impl Into<String>) -> Self {
        RoleRow {
            name: name.into(),
            guard_name: "web".to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for RoleRow {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// `permissions` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    /// Unique permission name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl PermissionRow {
    /// New permission
    pub fn new(name: impl Into<String>) -> Self {
        PermissionRow {
            name: name.into(),
            description: None,
            created_at: Utc::now(),
        }
    }
}

impl Record for PermissionRow {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// `role_permissions` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionRow {
    /// Role id
    pub role_id: RowId,
    /// Permission id
    pub permission_id: RowId,
}

impl Record for RolePermissionRow {
    type Key = (RowId, RowId);

    fn key(&self) -> (RowId, RowId) {
        (self.role_id, self.permission_id)
    }
}

/// `user_roles` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleRow {
    /// Principal id
    pub user_id: PrincipalId,
    /// Role id
    pub role_id: RowId,
}

impl Record for UserRoleRow {
    type Key = (PrincipalId, RowId);

    fn key(&self) -> (PrincipalId, RowId) {
        (self.user_id, self.role_id)
    }
}

/// `user_fields` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFieldRow {
    /// Principal id
    pub user_id: PrincipalId,
    /// Field name
    pub field_name: String,
    /// Text encoded value; `None` for null
    pub field_value: Option<String>,
}

impl Record for UserFieldRow {
    type Key = (PrincipalId, String);

    fn key(&self) -> (PrincipalId, String) {
        (self.user_id, self.field_name.clone())
    }
}

/// `users` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    /// Display name
    pub name: String,
    /// Unique email
    pub email: String,
    /// Stored password, as given
    pub password: String,
    /// Remember-me token
    pub remember_token: Option<String>,
    /// Assigned user type
    pub user_type: Option<String>,
    /// Embedded dynamic field document
    pub dynamic_fields: Option<BTreeMap<String, Value>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Soft deletion time
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UserRow {
    /// New user with no type and no dynamic fields
    pub fn new(name: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        let now = Utc::now();
        UserRow {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            remember_token: None,
            user_type: None,
            dynamic_fields: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the row is soft deleted
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Record for UserRow {
    type Key = String;

    fn key(&self) -> String {
        self.email.clone()
    }
}

/// The set of tables Gatehouse persists to
#[derive(Debug)]
pub struct Database {
    names: TableNames,
    dynamic_fields_column: bool,
    available: Arc<AtomicBool>,
    users: Table<UserRow>,
    roles: Table<RoleRow>,
    permissions: Table<PermissionRow>,
    user_roles: Table<UserRoleRow>,
    role_permissions: Table<RolePermissionRow>,
    user_fields: Table<UserFieldRow>,
}

impl Database {
    /// Open an empty database
    ///
    /// `dynamic_fields_column` states whether the users table carries the
    /// embedded `dynamic_fields` document.
    pub fn new(names: TableNames, dynamic_fields_column: bool) -> Self {
        let available = Arc::new(AtomicBool::new(true));
        info!(
            users = %names.users,
            dynamic_fields_column,
            "Opening in-memory database"
        );

        Database {
            users: Table::new(&names.users, available.clone()),
            roles: Table::new(&names.roles, available.clone()),
            permissions: Table::new(&names.permissions, available.clone()),
            user_roles: Table::new(&names.user_roles, available.clone()),
            role_permissions: Table::new(&names.role_permissions, available.clone()),
            user_fields: Table::new(&names.user_fields, available.clone()),
            names,
            dynamic_fields_column,
            available,
        }
    }

    /// Empty database with default table names and the embedded column
    pub fn in_memory() -> Self {
        Database::new(TableNames::default(), true)
    }

    /// Table names in use
    pub fn table_names(&self) -> &TableNames {
        &self.names
    }

    /// Whether users carry an embedded `dynamic_fields` document
    pub fn has_dynamic_fields_column(&self) -> bool {
        self.dynamic_fields_column
    }

    /// Make every table fail with `Unavailable`
    pub fn close(&self) {
        debug!("Closing database");
        self.available.store(false, Ordering::Release);
    }

    /// Undo [`Database::close`]
    pub fn reopen(&self) {
        debug!("Reopening database");
        self.available.store(true, Ordering::Release);
    }

    /// Whether the database is serving requests
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Users table
    pub fn users(&self) -> &Table<UserRow> {
        &self.users
    }

    /// Roles table
    pub fn roles(&self) -> &Table<RoleRow> {
        &self.roles
    }

    /// Permissions table
    pub fn permissions(&self) -> &Table<PermissionRow> {
        &self.permissions
    }

    /// Principal to role pivot
    pub fn user_roles(&self) -> &Table<UserRoleRow> {
        &self.user_roles
    }

    /// Role to permission pivot
    pub fn role_permissions(&self) -> &Table<RolePermissionRow> {
        &self.role_permissions
    }

    /// Dynamic field side table
    pub fn user_fields(&self) -> &Table<UserFieldRow> {
        &self.user_fields
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::in_memory()
    }
}
