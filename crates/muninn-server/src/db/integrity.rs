// crates/muninn-server/src/db/integrity.rs
// Open-time integrity gate and structured report.
//
// A handle is refused when the report fails: corruption, missing tables or
// indexes, wrong journal mode, or foreign keys off. A schema version ahead
// of this binary is reported but non-fatal.

use rusqlite::Connection;
use serde::Serialize;

use super::migration_helpers::{index_exists, schema_version, table_exists};
use super::schema::{LATEST_SCHEMA_VERSION, required_fts_tables, required_indexes, required_tables};

/// Structured result of the open-time checks.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub integrity_ok: bool,
    pub missing_tables: Vec<String>,
    pub missing_fts_tables: Vec<String>,
    pub missing_indexes: Vec<String>,
    pub journal_mode: String,
    pub journal_mode_ok: bool,
    pub foreign_keys_on: bool,
    pub schema_version: i64,
    pub schema_ahead: bool,
}

impl IntegrityReport {
    /// Whether the store handle may be used.
    pub fn is_ok(&self) -> bool {
        self.integrity_ok
            && self.missing_tables.is_empty()
            && self.missing_fts_tables.is_empty()
            && self.missing_indexes.is_empty()
            && self.journal_mode_ok
            && self.foreign_keys_on
    }

    /// Human-readable failure summary, one clause per problem class.
    pub fn failure_summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.integrity_ok {
            parts.push("integrity_check failed".to_string());
        }
        if !self.missing_tables.is_empty() {
            parts.push(format!("missing tables: {}", self.missing_tables.join(", ")));
        }
        if !self.missing_fts_tables.is_empty() {
            parts.push(format!(
                "missing FTS tables: {}",
                self.missing_fts_tables.join(", ")
            ));
        }
        if !self.missing_indexes.is_empty() {
            parts.push(format!(
                "missing indexes: {}",
                self.missing_indexes.join(", ")
            ));
        }
        if !self.journal_mode_ok {
            parts.push(format!("journal mode is {}, expected wal", self.journal_mode));
        }
        if !self.foreign_keys_on {
            parts.push("foreign keys are off".to_string());
        }
        if self.schema_ahead {
            parts.push(format!(
                "schema v{} is newer than supported v{}",
                self.schema_version, LATEST_SCHEMA_VERSION
            ));
        }
        parts.join("; ")
    }
}

/// Fast corruption check, run before migrations touch anything.
pub fn preflight_ok(conn: &Connection) -> bool {
    conn.query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0))
        .map(|result| result.eq_ignore_ascii_case("ok"))
        .unwrap_or(false)
}

/// Full post-migration report. `expect_wal` is false for in-memory databases
/// where WAL does not apply.
pub fn verify(conn: &Connection, expect_wal: bool) -> IntegrityReport {
    let integrity_ok = preflight_ok(conn);

    let missing_tables: Vec<String> = required_tables()
        .into_iter()
        .filter(|t| !table_exists(conn, t))
        .map(String::from)
        .collect();

    let missing_fts_tables: Vec<String> = required_fts_tables()
        .into_iter()
        .filter(|t| !table_exists(conn, t))
        .map(String::from)
        .collect();

    let missing_indexes: Vec<String> = required_indexes()
        .into_iter()
        .filter(|i| !index_exists(conn, i))
        .map(String::from)
        .collect();

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap_or_else(|_| "unknown".to_string());
    let journal_mode_ok = !expect_wal || journal_mode.eq_ignore_ascii_case("wal");

    let foreign_keys_on: bool = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
        .unwrap_or(false);

    let version = schema_version(conn);

    let report = IntegrityReport {
        integrity_ok,
        missing_tables,
        missing_fts_tables,
        missing_indexes,
        journal_mode,
        journal_mode_ok,
        foreign_keys_on,
        schema_version: version,
        schema_ahead: version > LATEST_SCHEMA_VERSION,
    };

    if report.schema_ahead {
        tracing::warn!("{}", report.failure_summary());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::ensure_sqlite_vec_registered;
    use crate::db::schema::run_all_migrations;

    fn migrated_conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_migrated_db_verifies_ok() {
        let conn = migrated_conn();
        let report = verify(&conn, false);
        assert!(report.is_ok(), "unexpected failure: {}", report.failure_summary());
        assert!(!report.schema_ahead);
    }

    #[test]
    fn test_missing_table_fails_report() {
        let conn = migrated_conn();
        conn.execute_batch("DROP TABLE budget_recommendations").unwrap();
        let report = verify(&conn, false);
        assert!(!report.is_ok());
        assert_eq!(report.missing_tables, vec!["budget_recommendations"]);
        assert!(report.failure_summary().contains("budget_recommendations"));
    }

    #[test]
    fn test_missing_fts_table_is_distinguished() {
        let conn = migrated_conn();
        conn.execute_batch("DROP TABLE learnings_fts").unwrap();
        let report = verify(&conn, false);
        assert!(!report.is_ok());
        assert!(report.missing_tables.is_empty());
        assert_eq!(report.missing_fts_tables, vec!["learnings_fts"]);
    }

    #[test]
    fn test_foreign_keys_off_fails_report() {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=OFF;").unwrap();
        run_all_migrations(&conn).unwrap();
        let report = verify(&conn, false);
        assert!(!report.foreign_keys_on);
        assert!(!report.is_ok());
    }

    #[test]
    fn test_schema_ahead_is_nonfatal() {
        let conn = migrated_conn();
        conn.execute(
            "UPDATE schema_meta SET value = ? WHERE key = 'schema_version'",
            [(LATEST_SCHEMA_VERSION + 5).to_string()],
        )
        .unwrap();
        let report = verify(&conn, false);
        assert!(report.schema_ahead);
        assert!(report.is_ok(), "schema-ahead must not fail the gate");
    }

    #[test]
    fn test_preflight_ok_on_healthy_db() {
        let conn = migrated_conn();
        assert!(preflight_ok(&conn));
    }
}
