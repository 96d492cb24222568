// crates/muninn-server/src/db/sessions.rs
// Sessions and the events observed inside them.
//
// Sessions are append-only and terminal once ended. Tool calls, test
// results, commits, and reverts are per-session markers consumed by the
// outcome pipeline.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::{SessionRow, TestResultRow, ToolCallRow, split_files_involved};

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        goal: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        outcome: row.get(5)?,
        success: row.get(6)?,
        files_touched: super::types::parse_string_array(row.get(7)?),
    })
}

const SESSION_COLUMNS: &str =
    "id, project_id, goal, started_at, ended_at, outcome, success, files_touched";

/// Start a session. Returns the new session id.
pub fn start_session_sync(
    conn: &Connection,
    project_id: i64,
    goal: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO sessions (project_id, goal) VALUES (?1, ?2)",
        params![project_id, goal],
    )?;
    Ok(conn.last_insert_rowid())
}

/// End a session. Idempotent: a second end leaves the first outcome in
/// place, keeping the learning pipeline's per-session artefacts stable.
pub fn end_session_sync(
    conn: &Connection,
    session_id: i64,
    outcome: Option<&str>,
    success: Option<i64>,
    files_touched: &[String],
) -> rusqlite::Result<bool> {
    let files_json = serde_json::to_string(files_touched).unwrap_or_else(|_| "[]".to_string());
    let changed = conn.execute(
        "UPDATE sessions
         SET ended_at = datetime('now'), outcome = ?1, success = ?2, files_touched = ?3
         WHERE id = ?4 AND ended_at IS NULL",
        params![outcome, success, files_json, session_id],
    )?;
    Ok(changed > 0)
}

pub fn get_session_sync(conn: &Connection, session_id: i64) -> rusqlite::Result<Option<SessionRow>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [session_id],
        session_from_row,
    )
    .optional()
}

/// Most recent sessions for a project, newest first.
pub fn recent_sessions_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<SessionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE project_id = ?1
         ORDER BY started_at DESC, id DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], session_from_row)?;
    rows.collect()
}

/// Sessions that ended but have no reasoning trace yet (pipeline input).
pub fn sessions_needing_learning_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<SessionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions s
         WHERE s.project_id = ?1 AND s.ended_at IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM reasoning_traces t WHERE t.session_id = s.id)
         ORDER BY s.id ASC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], session_from_row)?;
    rows.collect()
}

/// Log one tool call.
pub fn log_tool_call_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    tool_name: &str,
    input_summary: &str,
    files_involved: &str,
    success: bool,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tool_calls (project_id, session_id, tool_name, input_summary, files_involved, success)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![project_id, session_id, tool_name, input_summary, files_involved, success as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All tool calls for a session in invocation order.
pub fn session_tool_calls_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<Vec<ToolCallRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, tool_name, input_summary, files_involved, success, created_at
         FROM tool_calls WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], |row| {
        Ok(ToolCallRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            tool_name: row.get(2)?,
            input_summary: row.get(3)?,
            files_involved: split_files_involved(&row.get::<_, String>(4)?),
            success: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
        })
    })?;
    rows.collect()
}

/// Distinct files touched by a session's tool calls.
pub fn session_files_touched_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<Vec<String>> {
    let calls = session_tool_calls_sync(conn, session_id)?;
    let mut seen = std::collections::BTreeSet::new();
    for call in calls {
        for file in call.files_involved {
            seen.insert(file);
        }
    }
    Ok(seen.into_iter().collect())
}

pub fn record_test_result_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    status: &str,
    passed: i64,
    failed: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO test_results (project_id, session_id, status, passed, failed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, session_id, status, passed, failed],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn session_test_results_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<Vec<TestResultRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, status, passed, failed FROM test_results
         WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], |row| {
        Ok(TestResultRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            status: row.get(2)?,
            passed: row.get(3)?,
            failed: row.get(4)?,
        })
    })?;
    rows.collect()
}

pub fn record_commit_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    sha: Option<&str>,
    message: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO git_commits (project_id, session_id, sha, message) VALUES (?1, ?2, ?3, ?4)",
        params![project_id, session_id, sha, message],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn record_revert_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    detail: Option<&str>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO revert_events (project_id, session_id, detail) VALUES (?1, ?2, ?3)",
        params![project_id, session_id, detail],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Counts the outcome pipeline folds into a score.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    pub commits: i64,
    pub tests_passed: i64,
    pub tests_failed: i64,
    pub issues_resolved: i64,
    pub error_events: i64,
    pub reverts: i64,
    pub files_modified: i64,
}

/// Gather the observable signals for one session in a single pass.
pub fn session_signals_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<SessionSignals> {
    let commits: i64 = conn.query_row(
        "SELECT COUNT(*) FROM git_commits WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    let (tests_passed, tests_failed): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(passed), 0), COALESCE(SUM(failed), 0)
         FROM test_results WHERE session_id = ?1",
        [session_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let issues_resolved: i64 = conn.query_row(
        "SELECT COUNT(*) FROM issues i
         WHERE i.status = 'resolved'
           AND i.resolved_at >= (SELECT started_at FROM sessions WHERE id = ?1)
           AND i.project_id = (SELECT project_id FROM sessions WHERE id = ?1)",
        [session_id],
        |row| row.get(0),
    )?;
    let error_events: i64 = conn.query_row(
        "SELECT COUNT(*) FROM error_events WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    let reverts: i64 = conn.query_row(
        "SELECT COUNT(*) FROM revert_events WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    let files_modified = session_files_touched_sync(conn, session_id)?.len() as i64;

    Ok(SessionSignals {
        commits,
        tests_passed,
        tests_failed,
        issues_resolved,
        error_events,
        reverts,
        files_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_project, setup_test_connection};

    #[test]
    fn test_session_lifecycle() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        let session_id = start_session_sync(&conn, project_id, Some("fix parser")).unwrap();
        let session = get_session_sync(&conn, session_id).unwrap().unwrap();
        assert_eq!(session.goal.as_deref(), Some("fix parser"));
        assert!(session.ended_at.is_none());

        let ended = end_session_sync(
            &conn,
            session_id,
            Some("done"),
            Some(2),
            &["src/parser.rs".to_string()],
        )
        .unwrap();
        assert!(ended);

        let session = get_session_sync(&conn, session_id).unwrap().unwrap();
        assert_eq!(session.success, Some(2));
        assert_eq!(session.files_touched, vec!["src/parser.rs"]);
    }

    #[test]
    fn test_end_session_is_terminal() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session_id = start_session_sync(&conn, project_id, None).unwrap();

        assert!(end_session_sync(&conn, session_id, Some("first"), Some(2), &[]).unwrap());
        // Second end must not overwrite the first
        assert!(!end_session_sync(&conn, session_id, Some("second"), Some(0), &[]).unwrap());

        let session = get_session_sync(&conn, session_id).unwrap().unwrap();
        assert_eq!(session.outcome.as_deref(), Some("first"));
        assert_eq!(session.success, Some(2));
    }

    #[test]
    fn test_tool_calls_preserve_order() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session_id = start_session_sync(&conn, project_id, None).unwrap();

        log_tool_call_sync(&conn, project_id, session_id, "read_file", "main", "src/main.rs", true)
            .unwrap();
        log_tool_call_sync(&conn, project_id, session_id, "edit_file", "fix", "src/main.rs,src/lib.rs", true)
            .unwrap();

        let calls = session_tool_calls_sync(&conn, session_id).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].tool_name, "read_file");
        assert_eq!(calls[1].files_involved, vec!["src/main.rs", "src/lib.rs"]);
    }

    #[test]
    fn test_files_touched_dedupes() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session_id = start_session_sync(&conn, project_id, None).unwrap();

        log_tool_call_sync(&conn, project_id, session_id, "read_file", "", "a.rs", true).unwrap();
        log_tool_call_sync(&conn, project_id, session_id, "edit_file", "", "a.rs,b.rs", true)
            .unwrap();

        let touched = session_files_touched_sync(&conn, session_id).unwrap();
        assert_eq!(touched, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_session_signals_aggregation() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session_id = start_session_sync(&conn, project_id, None).unwrap();

        record_commit_sync(&conn, project_id, session_id, Some("abc123"), None).unwrap();
        record_commit_sync(&conn, project_id, session_id, Some("def456"), None).unwrap();
        record_test_result_sync(&conn, project_id, session_id, "ran", 10, 2).unwrap();
        record_revert_sync(&conn, project_id, session_id, Some("bad change")).unwrap();
        log_tool_call_sync(&conn, project_id, session_id, "edit_file", "", "a.rs,b.rs", true)
            .unwrap();

        let signals = session_signals_sync(&conn, session_id).unwrap();
        assert_eq!(signals.commits, 2);
        assert_eq!(signals.tests_passed, 10);
        assert_eq!(signals.tests_failed, 2);
        assert_eq!(signals.reverts, 1);
        assert_eq!(signals.files_modified, 2);
    }

    #[test]
    fn test_sessions_needing_learning_excludes_open_and_traced() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        let open = start_session_sync(&conn, project_id, None).unwrap();
        let ended = start_session_sync(&conn, project_id, None).unwrap();
        end_session_sync(&conn, ended, None, Some(1), &[]).unwrap();

        let pending = sessions_needing_learning_sync(&conn, project_id, 10).unwrap();
        let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ended]);
        assert!(!ids.contains(&open));

        // Once traced, the session drops out
        conn.execute(
            "INSERT INTO reasoning_traces (project_id, session_id, problem_signature, dead_ends, hypothesis_chain, strategy_tags)
             VALUES (?1, ?2, '[]', '[]', '[]', '[]')",
            params![project_id, ended],
        )
        .unwrap();
        assert!(sessions_needing_learning_sync(&conn, project_id, 10)
            .unwrap()
            .is_empty());
    }
}
