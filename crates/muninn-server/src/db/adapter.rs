// crates/muninn-server/src/db/adapter.rs
// The store capability set: one trait, two implementations.
//
// {init, exec, run, get, all, close, raw} is the whole contract. LocalStore
// delegates to the pooled embedded database; RemoteStore (remote.rs) speaks
// the HTTP statement protocol. Dynamic SqlValue rows exist only at this
// seam: internal code parses them into typed records immediately or, in
// local mode, skips the seam entirely via raw().

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{EnvConfig, StoreMode};
use crate::error::{MuninnError, Result};

use super::pool::DatabasePool;

/// A single dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Render as a SQL literal for the statement-shipping remote protocol.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => v.to_string(),
            SqlValue::Text(v) => format!("'{}'", v.replace('\'', "''")),
            SqlValue::Blob(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("X'{hex}'")
            }
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}
impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}
impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}
impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}
impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
            SqlValue::Blob(v) => ToSqlOutput::Owned(Value::Blob(v.clone())),
        })
    }
}

/// One result row: column name -> value.
pub type SqlRow = BTreeMap<String, SqlValue>;

/// Result of a mutating statement.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RunResult {
    pub last_insert_rowid: i64,
    pub changes: usize,
}

/// The store capability set shared by local and remote adapters.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Prepare the store for use (migrations, integrity gate).
    async fn init(&self) -> Result<()>;

    /// Execute a statement batch without results.
    async fn exec(&self, sql: &str) -> Result<()>;

    /// Execute one mutating statement with bound parameters.
    async fn run(&self, sql: &str, params: Vec<SqlValue>) -> Result<RunResult>;

    /// Fetch the first row, if any.
    async fn get(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<SqlRow>>;

    /// Fetch all rows.
    async fn all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>>;

    /// Release the store.
    async fn close(&self) -> Result<()>;

    /// Direct engine access. Only the local adapter can offer this; the
    /// typed query layer and FTS repair run through it.
    fn raw(&self) -> Result<&Arc<DatabasePool>>;

    /// Adapter mode label for logs and error messages.
    fn mode(&self) -> StoreMode;
}

/// Local adapter over the pooled embedded database.
pub struct LocalStore {
    pool: Arc<DatabasePool>,
}

impl LocalStore {
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

fn row_to_sql_row(row: &rusqlite::Row<'_>, column_names: &[String]) -> SqlRow {
    let mut out = SqlRow::new();
    for (idx, name) in column_names.iter().enumerate() {
        let value = match row.get_ref(idx) {
            Ok(ValueRef::Null) | Err(_) => SqlValue::Null,
            Ok(ValueRef::Integer(v)) => SqlValue::Integer(v),
            Ok(ValueRef::Real(v)) => SqlValue::Real(v),
            Ok(ValueRef::Text(v)) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
            Ok(ValueRef::Blob(v)) => SqlValue::Blob(v.to_vec()),
        };
        out.insert(name.clone(), value);
    }
    out
}

#[async_trait]
impl StoreAdapter for LocalStore {
    async fn init(&self) -> Result<()> {
        // Opening the pool already ran migrations and the integrity gate.
        Ok(())
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.pool
            .run(move |conn| conn.execute_batch(&sql))
            .await
    }

    async fn run(&self, sql: &str, params: Vec<SqlValue>) -> Result<RunResult> {
        let sql = sql.to_string();
        self.pool
            .run(move |conn| {
                let changes = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok::<_, rusqlite::Error>(RunResult {
                    last_insert_rowid: conn.last_insert_rowid(),
                    changes,
                })
            })
            .await
    }

    async fn get(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<SqlRow>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    async fn all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let sql = sql.to_string();
        self.pool
            .run(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let column_names: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();
                let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    Ok(row_to_sql_row(row, &column_names))
                })?;
                rows.collect::<rusqlite::Result<Vec<SqlRow>>>()
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn raw(&self) -> Result<&Arc<DatabasePool>> {
        Ok(&self.pool)
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }
}

/// Build the adapter the environment asks for.
pub async fn open_store(
    config: &EnvConfig,
    db_path: &std::path::Path,
) -> Result<Arc<dyn StoreAdapter>> {
    match config.mode {
        StoreMode::Local => {
            let pool = DatabasePool::open_logged(
                db_path,
                "memory.db",
                crate::config::migration_log_path(),
            )
            .await
            .map_err(|e| match e.downcast::<MuninnError>() {
                Ok(muninn_err) => muninn_err,
                Err(other) => MuninnError::Other(other.to_string()),
            })?;
            Ok(Arc::new(LocalStore::new(Arc::new(pool))))
        }
        StoreMode::Http => {
            let url = config.primary_url.clone().ok_or_else(|| {
                MuninnError::Config("MUNINN_PRIMARY_URL is required in http mode".to_string())
            })?;
            let store = super::remote::RemoteStore::new(url, config.api_token.clone())?;
            Ok(Arc::new(store))
        }
    }
}
