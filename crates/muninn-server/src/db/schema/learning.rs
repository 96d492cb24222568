// crates/muninn-server/src/db/schema/learning.rs
// Migrations for the outcome-and-learning loop tables.
//
// These arrived after the base schema shipped, so older databases gain them
// through create_table_if_missing / add_column_if_missing rather than the
// base batch.

use anyhow::Result;
use rusqlite::Connection;

use super::super::migration_helpers::{add_column_if_missing, create_table_if_missing};

/// Reasoning traces: one post-session artefact per session.
pub fn migrate_reasoning_traces(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "reasoning_traces",
        "CREATE TABLE reasoning_traces (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            session_id INTEGER NOT NULL UNIQUE REFERENCES sessions(id),
            problem_signature TEXT NOT NULL,
            dead_ends TEXT NOT NULL,
            hypothesis_chain TEXT NOT NULL,
            breakthrough TEXT,
            strategy_tags TEXT NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            outcome TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX idx_traces_project ON reasoning_traces(project_id, created_at DESC);",
    )
}

/// Distilled strategy catalog.
pub fn migrate_strategy_catalog(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "strategy_catalog",
        "CREATE TABLE strategy_catalog (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            success_rate REAL NOT NULL DEFAULT 0.0,
            times_used INTEGER NOT NULL DEFAULT 0,
            avg_duration_ms INTEGER NOT NULL DEFAULT 0,
            source_trace_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(project_id, name)
        );",
    )
}

/// A/B budget experiments.
pub fn migrate_ab_tests(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "ab_tests",
        "CREATE TABLE ab_tests (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            test_name TEXT NOT NULL,
            control_config TEXT NOT NULL,
            variant_config TEXT NOT NULL,
            metric TEXT NOT NULL DEFAULT 'outcome_score',
            min_sessions INTEGER NOT NULL DEFAULT 20,
            control_sessions INTEGER NOT NULL DEFAULT 0,
            variant_sessions INTEGER NOT NULL DEFAULT 0,
            control_metric_sum REAL NOT NULL DEFAULT 0.0,
            variant_metric_sum REAL NOT NULL DEFAULT 0.0,
            status TEXT NOT NULL DEFAULT 'running',
            conclusion TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            concluded_at TEXT
        );
        CREATE INDEX idx_ab_tests_status ON ab_tests(project_id, status);",
    )
}

/// Per-category budget overrides learned from feedback. Sole upsert key is
/// (project_id, context_type).
pub fn migrate_budget_recommendations(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "budget_recommendations",
        "CREATE TABLE budget_recommendations (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            context_type TEXT NOT NULL,
            recommended_budget INTEGER NOT NULL,
            use_rate REAL NOT NULL DEFAULT 0.0,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(project_id, context_type)
        );",
    )
}

/// Retrieval feedback rows comparing suggestions against files touched.
pub fn migrate_retrieval_feedback(conn: &Connection) -> Result<()> {
    create_table_if_missing(
        conn,
        "retrieval_feedback",
        "CREATE TABLE retrieval_feedback (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            context_type TEXT NOT NULL,
            item_path TEXT NOT NULL,
            was_suggested INTEGER NOT NULL DEFAULT 1,
            was_used INTEGER NOT NULL DEFAULT 0,
            relevance_score REAL NOT NULL DEFAULT 0.0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX idx_retrieval_session ON retrieval_feedback(session_id);",
    )
}

/// Review scheduling and decay exemption for learnings.
pub fn migrate_learning_review_columns(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "learnings", "review_after", "TEXT")?;
    add_column_if_missing(conn, "learnings", "foundational", "INTEGER NOT NULL DEFAULT 0")?;
    Ok(())
}

/// Rename-history column on projects (local mode only writes it).
pub fn migrate_project_previous_paths(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "projects", "previous_paths", "TEXT NOT NULL DEFAULT '[]'")
}
