// crates/muninn-server/src/db/test_support.rs
// Shared test helpers for database tests

use rusqlite::Connection;
use std::sync::Arc;

use super::pool::DatabasePool;

/// Create a test pool (in-memory DB, migrations applied).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Create a test pool with a default project. Returns (pool, project_id).
pub async fn setup_test_pool_with_project() -> (Arc<DatabasePool>, i64) {
    let pool = setup_test_pool().await;
    let project_id = pool
        .interact(|conn| {
            super::project::ensure_project_sync(conn, "/test/path", Some("test"), false)
                .map(|p| p.id)
                .map_err(Into::into)
        })
        .await
        .expect("Failed to seed project");
    (pool, project_id)
}

/// Create a sync in-memory connection with all migrations applied.
/// Use this for sync tests that don't need async pool semantics.
pub fn setup_test_connection() -> Connection {
    use super::pool::ensure_sqlite_vec_registered;
    use super::schema::run_all_migrations;
    ensure_sqlite_vec_registered();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    run_all_migrations(&conn).unwrap();
    conn
}

// ═══════════════════════════════════════════════════════════════════════════
// Seed helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Seed the default project. Returns its id.
pub fn seed_project(conn: &Connection) -> i64 {
    super::project::ensure_project_sync(conn, "/test/path", Some("test"), false)
        .unwrap()
        .id
}

/// Seed a learning with a given confidence. Returns its id.
pub fn seed_learning(conn: &Connection, project_id: i64, title: &str, confidence: f64) -> i64 {
    super::learnings::add_learning_sync(
        conn,
        project_id,
        super::learnings::AddLearningParams {
            title,
            content: "seeded content",
            category: "pattern",
            context: "",
            confidence,
            foundational: false,
            review_after: None,
        },
    )
    .unwrap()
}

/// Seed an ended session with tool calls over the given files.
/// Returns the session id.
pub fn seed_ended_session(
    conn: &Connection,
    project_id: i64,
    success: i64,
    files: &[&str],
) -> i64 {
    let session_id = super::sessions::start_session_sync(conn, project_id, None).unwrap();
    for file in files {
        super::sessions::log_tool_call_sync(
            conn,
            project_id,
            session_id,
            "edit_file",
            "seeded",
            file,
            true,
        )
        .unwrap();
    }
    let touched: Vec<String> = files.iter().map(|s| s.to_string()).collect();
    super::sessions::end_session_sync(conn, session_id, None, Some(success), &touched).unwrap();
    session_id
}

/// Seed a tool call with an explicit created_at offset (seconds from now).
pub fn seed_tool_call_at(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    tool_name: &str,
    input_summary: &str,
    files_involved: &str,
    success: bool,
    offset_secs: i64,
) -> i64 {
    conn.execute(
        "INSERT INTO tool_calls (project_id, session_id, tool_name, input_summary, files_involved, success, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now', ?7 || ' seconds'))",
        rusqlite::params![
            project_id,
            session_id,
            tool_name,
            input_summary,
            files_involved,
            success as i64,
            offset_secs
        ],
    )
    .unwrap();
    conn.last_insert_rowid()
}
