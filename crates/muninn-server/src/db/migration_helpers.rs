// crates/muninn-server/src/db/migration_helpers.rs
// Schema introspection and migration helper utilities

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Check if a table (or virtual table) exists in the database
pub fn table_exists(conn: &Connection, table_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
        [table_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Check if an index exists in the database
pub fn index_exists(conn: &Connection, index_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?",
        [index_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Check if a column exists in a table
pub fn column_exists(conn: &Connection, table_name: &str, column_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?) WHERE name=?",
        [table_name, column_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Column names of a table, in declaration order.
/// Works for FTS5 virtual tables too, which is how the integrity check
/// detects an FTS index that lost columns across a migration.
pub fn table_columns(conn: &Connection, table_name: &str) -> Vec<String> {
    let mut stmt = match conn.prepare("SELECT name FROM pragma_table_info(?)") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    stmt.query_map([table_name], |row| row.get::<_, String>(0))
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

/// Add a column to a table if it doesn't already exist
pub fn add_column_if_missing(
    conn: &Connection,
    table_name: &str,
    column_name: &str,
    column_def: &str,
) -> Result<()> {
    if column_exists(conn, table_name, column_name) {
        return Ok(());
    }

    info!("Migrating {} to add {} column", table_name, column_name);
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table_name, column_name, column_def
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// Create a table if it doesn't exist (with logging)
pub fn create_table_if_missing(conn: &Connection, table_name: &str, sql: &str) -> Result<()> {
    if table_exists(conn, table_name) {
        return Ok(());
    }

    info!("Creating {} table", table_name);
    conn.execute_batch(sql)?;
    Ok(())
}

/// Current schema version recorded in schema_meta, 0 when unset.
pub fn schema_version(conn: &Connection) -> i64 {
    if !table_exists(conn, "schema_meta") {
        return 0;
    }
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key='schema_version'",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// Record the schema version. Never lowers it: an older binary must not
/// roll back a database written by a newer one.
pub fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let current = schema_version(conn);
    if version <= current {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = ?1",
        [version.to_string()],
    )?;
    Ok(())
}
