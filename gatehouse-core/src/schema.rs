//! SQL schema for the persisted tables
//!
//! Emits portable `CREATE TABLE` statements matching the storage layer's
//! unique constraints, honoring table name overrides.

use crate::config::TableNames;

/// `CREATE TABLE` statements in dependency order
pub fn statements(tables: &TableNames, dynamic_fields_column: bool) -> Vec<String> {
    let users = quote(&tables.users);
    let roles = quote(&tables.roles);
    let permissions = quote(&tables.permissions);

    let dynamic_column = if dynamic_fields_column {
        "    dynamic_fields JSON NULL,\n"
    } else {
        ""
    };

    vec![
        format!(
            "CREATE TABLE {users} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   name VARCHAR(255) NOT NULL,\n\
             \x20   email VARCHAR(255) NOT NULL UNIQUE,\n\
             \x20   password VARCHAR(255) NOT NULL,\n\
             \x20   remember_token VARCHAR(100) NULL,\n\
             \x20   user_type VARCHAR(255) NULL,\n\
             {dynamic_column}\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL,\n\
             \x20   deleted_at TIMESTAMP NULL\n\
             );"
        ),
        format!(
            "CREATE TABLE {roles} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   name VARCHAR(255) NOT NULL UNIQUE,\n\
             \x20   guard_name VARCHAR(255) NOT NULL DEFAULT 'web',\n\
             \x20   description TEXT NULL,\n\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL\n\
             );"
        ),
        format!(
            "CREATE TABLE {permissions} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   name VARCHAR(255) NOT NULL UNIQUE,\n\
             \x20   description TEXT NULL,\n\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL\n\
             );"
        ),
        format!(
            "CREATE TABLE {pivot} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   role_id BIGINT NOT NULL REFERENCES {roles} (id) ON DELETE CASCADE,\n\
             \x20   permission_id BIGINT NOT NULL REFERENCES {permissions} (id) ON DELETE CASCADE,\n\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL,\n\
             \x20   UNIQUE (role_id, permission_id)\n\
             );",
            pivot = quote(&tables.role_permissions)
        ),
        format!(
            "CREATE TABLE {pivot} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   user_id BIGINT NOT NULL REFERENCES {users} (id) ON DELETE CASCADE,\n\
             \x20   role_id BIGINT NOT NULL REFERENCES {roles} (id) ON DELETE CASCADE,\n\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL,\n\
             \x20   UNIQUE (user_id, role_id)\n\
             );",
            pivot = quote(&tables.user_roles)
        ),
        format!(
            "CREATE TABLE {fields} (\n\
             \x20   id BIGINT PRIMARY KEY,\n\
             \x20   user_id BIGINT NOT NULL REFERENCES {users} (id) ON DELETE CASCADE,\n\
             \x20   field_name VARCHAR(255) NOT NULL,\n\
             \x20   field_value TEXT NULL,\n\
             \x20   created_at TIMESTAMP NULL,\n\
             \x20   updated_at TIMESTAMP NULL,\n\
             \x20   UNIQUE (user_id, field_name)\n\
             );",
            fields = quote(&tables.user_fields)
        ),
    ]
}

/// The whole schema as one script
pub fn render_ddl(tables: &TableNames, dynamic_fields_column: bool) -> String {
    let mut script = statements(tables, dynamic_fields_column).join("\n\n");
    script.push('\n');
    script
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
