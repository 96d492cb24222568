// crates/muninn-server/src/db/errors.rs
// Error events and error->fix pairs for cross-session error learning.
//
// Raw errors are normalized to a fingerprint (paths, line:col, numbers, hex
// ids, and long quoted strings stripped) so the same failure dedupes across
// sessions no matter which file or line it surfaced at.

use rusqlite::{Connection, params};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::types::ErrorFixRow;

/// Normalize an error message and hash it for O(1) lookup.
/// Returns (fingerprint_hash, normalized_template).
pub fn error_fingerprint(raw_error: &str) -> (String, String) {
    use regex::Regex;
    use std::sync::LazyLock;

    #[allow(clippy::expect_used)]
    static RE_PATH: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(/[\w./-]+)+\.\w+").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_LINE_COL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r":\d+:\d+").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_NUMBERS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b\d{2,}\b").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_HEX: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[0-9a-f]{8,}").expect("valid regex"));
    #[allow(clippy::expect_used)]
    static RE_DQUOTE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#""[^"]{20,}""#).expect("valid regex"));

    let normalized = raw_error.to_lowercase();
    let normalized = RE_PATH.replace_all(&normalized, "<PATH>");
    let normalized = RE_LINE_COL.replace_all(&normalized, ":<N>:<N>");
    let normalized = RE_NUMBERS.replace_all(&normalized, "<N>");
    let normalized = RE_HEX.replace_all(&normalized, "<ID>");
    let normalized = RE_DQUOTE.replace_all(&normalized, "<STR>");

    let template = normalized.trim().to_string();

    let mut hasher = DefaultHasher::new();
    template.hash(&mut hasher);
    let hash = format!("{:016x}", hasher.finish());

    (hash, template)
}

/// Record an observed error event.
pub fn record_error_event_sync(
    conn: &Connection,
    project_id: i64,
    session_id: Option<i64>,
    file_path: Option<&str>,
    error_text: &str,
) -> rusqlite::Result<i64> {
    let (fingerprint, _) = error_fingerprint(error_text);
    conn.execute(
        "INSERT INTO error_events (project_id, session_id, file_path, error_text, fingerprint)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, session_id, file_path, error_text, fingerprint],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Error events touching a file in the last `days` days.
pub fn error_count_for_file_sync(
    conn: &Connection,
    project_id: i64,
    file_path: &str,
    days: i64,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM error_events
         WHERE project_id = ?1 AND file_path = ?2
           AND created_at >= datetime('now', ?3 || ' days')",
        params![project_id, file_path, -days],
        |row| row.get(0),
    )
}

/// Most recent error events for a session or project.
pub fn recent_errors_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT error_text, file_path FROM error_events
         WHERE project_id = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![project_id, limit as i64], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    rows.collect()
}

/// Upsert an error->fix pair keyed on the error fingerprint; repeated
/// applications bump use_count.
pub fn store_error_fix_sync(
    conn: &Connection,
    project_id: i64,
    error_text: &str,
    fix_text: &str,
) -> rusqlite::Result<i64> {
    let (fingerprint, _) = error_fingerprint(error_text);
    conn.execute(
        "INSERT INTO error_fix_pairs (project_id, error_text, error_fingerprint, fix_text)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(project_id, error_fingerprint) DO UPDATE SET
            use_count = use_count + 1,
            fix_text = ?4,
            updated_at = datetime('now')",
        params![project_id, error_text, fingerprint, fix_text],
    )?;
    conn.query_row(
        "SELECT id FROM error_fix_pairs WHERE project_id = ?1 AND error_fingerprint = ?2",
        params![project_id, fingerprint],
        |row| row.get(0),
    )
}

/// Find a known fix for an error by fingerprint match.
pub fn lookup_error_fix_sync(
    conn: &Connection,
    project_id: i64,
    error_text: &str,
) -> Option<ErrorFixRow> {
    let (fingerprint, _) = error_fingerprint(error_text);
    conn.query_row(
        "SELECT id, error_text, error_fingerprint, fix_text, use_count
         FROM error_fix_pairs
         WHERE project_id = ?1 AND error_fingerprint = ?2",
        params![project_id, fingerprint],
        |row| {
            Ok(ErrorFixRow {
                id: row.get(0)?,
                error_text: row.get(1)?,
                error_fingerprint: row.get(2)?,
                fix_text: row.get(3)?,
                use_count: row.get(4)?,
            })
        },
    )
    .ok()
}

/// Most-applied fixes for a project.
pub fn top_error_fixes_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<ErrorFixRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, error_text, error_fingerprint, fix_text, use_count
         FROM error_fix_pairs
         WHERE project_id = ?1
         ORDER BY use_count DESC, updated_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![project_id, limit as i64], |row| {
        Ok(ErrorFixRow {
            id: row.get(0)?,
            error_text: row.get(1)?,
            error_fingerprint: row.get(2)?,
            fix_text: row.get(3)?,
            use_count: row.get(4)?,
        })
    })?;
    rows.collect()
}
