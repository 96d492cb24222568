// crates/muninn-server/src/db/schema/mod.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

mod fts;
mod learning;

pub use fts::{migrate_fts_tables, rebuild_fts, required_fts_tables};

use super::migration_helpers::{schema_version, set_schema_version};
use super::migration_log::{self, MigrationLogEntry};

/// Schema version this binary was built against. A database reporting a
/// higher version was written by a newer binary; opening it is non-fatal
/// but logged.
pub const LATEST_SCHEMA_VERSION: i64 = 4;

/// Tables the integrity check requires (FTS tables are listed separately).
pub fn required_tables() -> Vec<&'static str> {
    vec![
        "projects",
        "files",
        "symbols",
        "decisions",
        "issues",
        "learnings",
        "sessions",
        "relationships",
        "tool_calls",
        "test_results",
        "git_commits",
        "revert_events",
        "error_events",
        "error_fix_pairs",
        "call_graph",
        "test_source_map",
        "context_injections",
        "reasoning_traces",
        "strategy_catalog",
        "ab_tests",
        "budget_recommendations",
        "retrieval_feedback",
        "schema_meta",
    ]
}

/// Indexes the integrity check requires.
pub fn required_indexes() -> Vec<&'static str> {
    vec![
        "idx_files_project",
        "idx_decisions_project",
        "idx_learnings_project",
        "idx_sessions_project",
        "idx_tool_calls_session",
        "idx_injections_session",
    ]
}

/// Run all schema setup and migrations forward to latest.
///
/// Called during database initialization. Idempotent: existing tables and
/// columns are detected before changes are made.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    run_all_migrations_logged(conn, "memory.db", None)
}

/// Like [`run_all_migrations`] but appends each version transition to the
/// append-only migration log when a path is given. Log failures never block
/// a migration.
pub fn run_all_migrations_logged(
    conn: &Connection,
    db_label: &str,
    log_path: Option<&Path>,
) -> Result<()> {
    let from_version = schema_version(conn);
    if from_version > LATEST_SCHEMA_VERSION {
        tracing::warn!(
            "database schema v{} is newer than supported v{}; continuing read-compatible",
            from_version,
            LATEST_SCHEMA_VERSION
        );
    }

    let mut log = |version: i64, detail: &str| {
        if let Some(path) = log_path
            && let Err(e) =
                migration_log::append_entry(path, &MigrationLogEntry::new(version, db_label, detail))
        {
            tracing::warn!("migration log append failed (continuing): {e}");
        }
    };

    // v1: base tables
    conn.execute_batch(SCHEMA)?;
    if from_version < 1 {
        set_schema_version(conn, 1)?;
        log(1, "base_schema");
    }

    // v2: learning-loop tables
    learning::migrate_reasoning_traces(conn)?;
    learning::migrate_strategy_catalog(conn)?;
    learning::migrate_ab_tests(conn)?;
    learning::migrate_budget_recommendations(conn)?;
    learning::migrate_retrieval_feedback(conn)?;
    if from_version < 2 {
        set_schema_version(conn, 2)?;
        log(2, "learning_tables");
    }

    // v3: FTS mirrors (also repairs mis-created tables)
    fts::migrate_fts_tables(conn)?;
    if from_version < 3 {
        set_schema_version(conn, 3)?;
        log(3, "fts_mirrors");
    }

    // v4: review scheduling + rename history
    learning::migrate_learning_review_columns(conn)?;
    learning::migrate_project_previous_paths(conn)?;
    if from_version < 4 {
        set_schema_version(conn, 4)?;
        log(4, "review_columns");
    }

    Ok(())
}

/// Database schema SQL (v1 shape; later versions are applied as migrations)
pub const SCHEMA: &str = r#"
-- =======================================
-- CORE: Projects
-- =======================================
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    path TEXT UNIQUE NOT NULL,
    name TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT
);

-- =======================================
-- FILES & SYMBOLS
-- =======================================
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    path TEXT NOT NULL,
    purpose TEXT,
    fragility INTEGER NOT NULL DEFAULT 0,       -- 0 = not yet computed, else 1-10
    fragility_signals TEXT,                     -- FragilitySignals JSON
    fragility_computed_at TEXT,
    change_count INTEGER NOT NULL DEFAULT 0,
    velocity_score REAL NOT NULL DEFAULT 0.0,
    temperature TEXT,                           -- editorial: 'hot' | 'warm' | 'cold'
    archived_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, path)
);
CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id, fragility DESC, change_count DESC);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    file_id INTEGER NOT NULL REFERENCES files(id),
    name TEXT NOT NULL,
    is_exported INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);

-- =======================================
-- KNOWLEDGE: decisions, issues, learnings
-- =======================================
CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    decision TEXT NOT NULL,
    reasoning TEXT NOT NULL DEFAULT '',
    affects TEXT NOT NULL DEFAULT '[]',         -- JSON array of file paths
    status TEXT NOT NULL DEFAULT 'active',      -- 'active' | 'archived'
    outcome_status TEXT NOT NULL DEFAULT 'pending',
    outcome_at TEXT,
    outcome_notes TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_decisions_project ON decisions(project_id, status);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    issue_type TEXT NOT NULL DEFAULT 'bug',
    severity INTEGER NOT NULL DEFAULT 5,        -- 1-10
    status TEXT NOT NULL DEFAULT 'open',        -- 'open' | 'resolved'
    workaround TEXT,
    resolution TEXT,
    resolved_at TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(project_id, status);

CREATE TABLE IF NOT EXISTS learnings (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT 'pattern',
    context TEXT NOT NULL DEFAULT '',
    confidence REAL NOT NULL DEFAULT 1.0,       -- clamped to [0.5, 10.0]
    times_applied INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_learnings_project ON learnings(project_id, confidence DESC);

-- =======================================
-- RELATIONSHIPS (typed, directed)
-- =======================================
CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    source_type TEXT NOT NULL,
    source_id INTEGER NOT NULL,
    target_type TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 1.0,         -- 0-10
    notes TEXT
);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(project_id, source_type, source_id);

-- =======================================
-- SESSIONS & OBSERVED EVENTS
-- =======================================
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    goal TEXT,
    started_at TEXT DEFAULT CURRENT_TIMESTAMP,
    ended_at TEXT,
    outcome TEXT,                               -- freeform description
    success INTEGER,                            -- 0=failed, 1=partial, 2=success
    files_touched TEXT NOT NULL DEFAULT '[]'    -- JSON array
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id, started_at DESC);

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    tool_name TEXT NOT NULL,
    input_summary TEXT NOT NULL DEFAULT '',
    files_involved TEXT NOT NULL DEFAULT '',    -- comma-separated paths
    success INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_session ON tool_calls(session_id, id);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    status TEXT NOT NULL DEFAULT 'ran',
    passed INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS git_commits (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    sha TEXT,
    message TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS revert_events (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    detail TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- =======================================
-- ERRORS & FIXES
-- =======================================
CREATE TABLE IF NOT EXISTS error_events (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER REFERENCES sessions(id),
    file_path TEXT,
    error_text TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_error_events_file ON error_events(project_id, file_path);

CREATE TABLE IF NOT EXISTS error_fix_pairs (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    error_text TEXT NOT NULL,
    error_fingerprint TEXT NOT NULL,
    fix_text TEXT NOT NULL,
    use_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(project_id, error_fingerprint)
);

-- =======================================
-- GRAPHS
-- =======================================
CREATE TABLE IF NOT EXISTS call_graph (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    caller_file TEXT NOT NULL,
    callee_file TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_call_graph_callee ON call_graph(project_id, callee_file);

CREATE TABLE IF NOT EXISTS test_source_map (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    test_file TEXT NOT NULL,
    source_file TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_test_source_map ON test_source_map(project_id, source_file);

-- =======================================
-- CONTEXT FEEDBACK
-- =======================================
CREATE TABLE IF NOT EXISTS context_injections (
    id INTEGER PRIMARY KEY,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    context_type TEXT NOT NULL,
    source_id INTEGER,
    was_used INTEGER NOT NULL DEFAULT 0,
    relevance_score REAL NOT NULL DEFAULT 0.0,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_injections_session ON context_injections(session_id);

-- =======================================
-- VECTOR INDEX (sqlite-vec)
-- =======================================
CREATE VIRTUAL TABLE IF NOT EXISTS vec_context USING vec0(
    embedding float[1536],
    +source_kind TEXT,
    +source_id INTEGER,
    +content TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migration_helpers::{column_exists, schema_version, table_exists};
    use crate::db::pool::ensure_sqlite_vec_registered;

    fn fresh_conn() -> Connection {
        ensure_sqlite_vec_registered();
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_db_reaches_latest_version() {
        let conn = fresh_conn();
        assert_eq!(schema_version(&conn), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_all_required_tables_exist() {
        let conn = fresh_conn();
        for table in required_tables() {
            assert!(table_exists(&conn, table), "missing table: {table}");
        }
        for fts in required_fts_tables() {
            assert!(table_exists(&conn, fts), "missing FTS table: {fts}");
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh_conn();
        run_all_migrations(&conn).unwrap();
        run_all_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn), LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn test_later_columns_are_migrated_in() {
        let conn = fresh_conn();
        assert!(column_exists(&conn, "learnings", "foundational"));
        assert!(column_exists(&conn, "learnings", "review_after"));
        assert!(column_exists(&conn, "projects", "previous_paths"));
    }

    #[test]
    fn test_migration_log_records_transitions() {
        ensure_sqlite_vec_registered();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("migrations.log");
        let conn = Connection::open_in_memory().unwrap();

        run_all_migrations_logged(&conn, "test.db", Some(&log)).unwrap();

        let entries = crate::db::migration_log::read_entries(&log);
        assert_eq!(entries.len(), LATEST_SCHEMA_VERSION as usize);
        assert_eq!(entries.last().unwrap().version, LATEST_SCHEMA_VERSION);

        // Re-running on an up-to-date database logs nothing new
        run_all_migrations_logged(&conn, "test.db", Some(&log)).unwrap();
        assert_eq!(
            crate::db::migration_log::read_entries(&log).len(),
            LATEST_SCHEMA_VERSION as usize
        );
    }
}
