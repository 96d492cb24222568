// crates/muninn-server/src/db/remote.rs
// Remote HTTP store adapter.
//
// Serializes each capability call as POST {"statements": ["<sql>", ...]} to
// the primary URL, with `Authorization: Bearer <token>` when configured.
// Parameters are rendered into SQL literals before shipping because the
// wire protocol carries bare statements. Transport failures surface as
// Unreachable; raw() is Unavailable by construction.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::StoreMode;
use crate::error::{MuninnError, Result};

use super::adapter::{RunResult, SqlRow, SqlValue, StoreAdapter};
use super::pool::DatabasePool;

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct StatementRequest {
    statements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    results: Vec<StatementResult>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    rows: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    last_insert_rowid: i64,
    #[serde(default)]
    changes: usize,
}

fn json_to_sql_value(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Substitute `?1`-style (and bare `?`) placeholders with rendered literals.
/// Statements are shipped as plain SQL, so binding happens client-side.
fn bind_statement(sql: &str, params: &[SqlValue]) -> Result<String> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut positional = 0usize;
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            continue;
        }
        if c != '?' || in_string {
            out.push(c);
            continue;
        }

        // Collect an explicit index if present (?3), else use next position.
        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        let index = if digits.is_empty() {
            positional += 1;
            positional
        } else {
            digits.parse::<usize>().unwrap_or(0)
        };
        let value = params.get(index.wrapping_sub(1)).ok_or_else(|| {
            MuninnError::InvalidInput(format!("statement references missing parameter ?{index}"))
        })?;
        out.push_str(&value.to_sql_literal());
    }

    Ok(out)
}

impl RemoteStore {
    pub fn new(base_url: String, api_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    async fn post_statements(&self, statements: Vec<String>) -> Result<Vec<StatementResult>> {
        let mut request = self
            .client
            .post(&self.base_url)
            .json(&StatementRequest { statements });
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MuninnError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MuninnError::Unreachable(format!(
                "primary returned {}",
                response.status()
            )));
        }

        let parsed: StatementResponse = response
            .json()
            .await
            .map_err(|e| MuninnError::Unreachable(format!("malformed response: {e}")))?;
        Ok(parsed.results)
    }

    async fn post_single(&self, sql: String) -> Result<StatementResult> {
        let mut results = self.post_statements(vec![sql]).await?;
        if results.is_empty() {
            return Err(MuninnError::Unreachable(
                "primary returned no result for statement".to_string(),
            ));
        }
        Ok(results.remove(0))
    }
}

#[async_trait]
impl StoreAdapter for RemoteStore {
    async fn init(&self) -> Result<()> {
        // The primary owns migrations; a ping verifies reachability.
        self.post_statements(vec!["SELECT 1".to_string()]).await?;
        Ok(())
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        let statements: Vec<String> = sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if statements.is_empty() {
            return Ok(());
        }
        self.post_statements(statements).await?;
        Ok(())
    }

    async fn run(&self, sql: &str, params: Vec<SqlValue>) -> Result<RunResult> {
        let bound = bind_statement(sql, &params)?;
        let result = self.post_single(bound).await?;
        Ok(RunResult {
            last_insert_rowid: result.last_insert_rowid,
            changes: result.changes,
        })
    }

    async fn get(&self, sql: &str, params: Vec<SqlValue>) -> Result<Option<SqlRow>> {
        Ok(self.all(sql, params).await?.into_iter().next())
    }

    async fn all(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<SqlRow>> {
        let bound = bind_statement(sql, &params)?;
        let result = self.post_single(bound).await?;
        Ok(result
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| (k, json_to_sql_value(&v)))
                    .collect()
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn raw(&self) -> Result<&Arc<DatabasePool>> {
        Err(MuninnError::Unavailable {
            mode: "http",
            what: "raw connection access",
        })
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Http
    }
}
