// crates/muninn-server/src/db/issues.rs
// Known issues: open/resolved lifecycle with workarounds.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::IssueRow;

const ISSUE_COLUMNS: &str =
    "id, title, description, issue_type, severity, status, workaround, resolution";

fn issue_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok(IssueRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        issue_type: row.get(3)?,
        severity: row.get(4)?,
        status: row.get(5)?,
        workaround: row.get(6)?,
        resolution: row.get(7)?,
    })
}

pub fn add_issue_sync(
    conn: &Connection,
    project_id: i64,
    title: &str,
    description: &str,
    issue_type: &str,
    severity: i64,
    workaround: Option<&str>,
) -> rusqlite::Result<i64> {
    let severity = severity.clamp(1, 10);
    conn.execute(
        "INSERT INTO issues (project_id, title, description, issue_type, severity, workaround)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![project_id, title, description, issue_type, severity, workaround],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Resolve an open issue. Returns false when the issue does not exist or is
/// already resolved, which the tool layer maps to NotFound.
pub fn resolve_issue_sync(
    conn: &Connection,
    issue_id: i64,
    resolution: &str,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE issues
         SET status = 'resolved', resolution = ?1, resolved_at = datetime('now')
         WHERE id = ?2 AND status = 'open'",
        params![resolution, issue_id],
    )?;
    Ok(changed > 0)
}

pub fn get_issue_sync(conn: &Connection, issue_id: i64) -> rusqlite::Result<Option<IssueRow>> {
    conn.query_row(
        &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
        [issue_id],
        issue_from_row,
    )
    .optional()
}

/// Open issues, most severe first.
pub fn open_issues_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<IssueRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues
         WHERE project_id = ?1 AND status = 'open'
         ORDER BY severity DESC, id DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], issue_from_row)?;
    rows.collect()
}

/// Open issues whose title or description mentions one of the given files.
pub fn issues_for_files_sync(
    conn: &Connection,
    project_id: i64,
    files: &[String],
    limit: usize,
) -> rusqlite::Result<Vec<IssueRow>> {
    let open = open_issues_sync(conn, project_id, 200)?;
    Ok(open
        .into_iter()
        .filter(|issue| {
            files.iter().any(|f| {
                issue.title.contains(f.as_str()) || issue.description.contains(f.as_str())
            })
        })
        .take(limit)
        .collect())
}
