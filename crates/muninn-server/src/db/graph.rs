// crates/muninn-server/src/db/graph.rs
// Call-graph edges, test->source mapping, and co-change history.

use rusqlite::{Connection, params};

/// Replace the outgoing call edges for a caller file.
pub fn replace_call_edges_sync(
    conn: &Connection,
    project_id: i64,
    caller_file: &str,
    callee_files: &[String],
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM call_graph WHERE project_id = ?1 AND caller_file = ?2",
        params![project_id, caller_file],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO call_graph (project_id, caller_file, callee_file) VALUES (?1, ?2, ?3)",
    )?;
    for callee in callee_files {
        stmt.execute(params![project_id, caller_file, callee])?;
    }
    Ok(())
}

/// Distinct callers of a file, from the call graph.
pub fn dependent_count_sync(
    conn: &Connection,
    project_id: i64,
    file_path: &str,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(DISTINCT caller_file) FROM call_graph
         WHERE project_id = ?1 AND callee_file = ?2",
        params![project_id, file_path],
        |row| row.get(0),
    )
}

/// Register a test file as covering a source file.
pub fn map_test_to_source_sync(
    conn: &Connection,
    project_id: i64,
    test_file: &str,
    source_file: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO test_source_map (project_id, test_file, source_file) VALUES (?1, ?2, ?3)",
        params![project_id, test_file, source_file],
    )?;
    Ok(())
}

/// Whether any test file covers this source file.
pub fn has_tests_sync(
    conn: &Connection,
    project_id: i64,
    source_file: &str,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM test_source_map WHERE project_id = ?1 AND source_file = ?2",
        params![project_id, source_file],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Files historically changed together with the target, ranked by how many
/// sessions touched both. Derived from ended sessions' files_touched lists.
pub fn cochangers_sync(
    conn: &Connection,
    project_id: i64,
    file_path: &str,
    limit: usize,
) -> rusqlite::Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT files_touched FROM sessions
         WHERE project_id = ?1 AND ended_at IS NOT NULL",
    )?;
    let rows = stmt.query_map([project_id], |row| row.get::<_, String>(0))?;

    let mut counts: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for row in rows {
        let touched: Vec<String> = serde_json::from_str(&row?).unwrap_or_default();
        if touched.iter().any(|f| f == file_path) {
            for other in touched {
                if other != file_path {
                    *counts.entry(other).or_insert(0) += 1;
                }
            }
        }
    }

    let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    Ok(ranked)
}
