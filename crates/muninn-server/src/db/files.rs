// crates/muninn-server/src/db/files.rs
// File and symbol records.
//
// Files are created on first observation and never deleted, only archived.
// Fragility and its signal breakdown are computed by the scorer; temperature
// and archived_at are editorial signals set elsewhere.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::FileRow;

fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        path: row.get(2)?,
        purpose: row.get(3)?,
        fragility: row.get(4)?,
        fragility_signals: row.get(5)?,
        fragility_computed_at: row.get(6)?,
        change_count: row.get(7)?,
        velocity_score: row.get(8)?,
        temperature: row.get(9)?,
        archived_at: row.get(10)?,
    })
}

const FILE_COLUMNS: &str = "id, project_id, path, purpose, fragility, fragility_signals, \
                            fragility_computed_at, change_count, velocity_score, temperature, \
                            archived_at";

/// Upsert a file by (project, path). A manually supplied fragility acts as
/// an override signal for the scorer; zero leaves scoring untouched.
pub fn upsert_file_sync(
    conn: &Connection,
    project_id: i64,
    path: &str,
    purpose: Option<&str>,
    fragility: Option<i64>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO files (project_id, path, purpose, fragility)
         VALUES (?1, ?2, ?3, COALESCE(?4, 0))
         ON CONFLICT(project_id, path) DO UPDATE SET
            purpose = COALESCE(?3, purpose),
            fragility = COALESCE(?4, fragility),
            updated_at = datetime('now')",
        params![project_id, path, purpose, fragility],
    )?;
    conn.query_row(
        "SELECT id FROM files WHERE project_id = ?1 AND path = ?2",
        params![project_id, path],
        |row| row.get(0),
    )
}

/// Look up one file by path.
pub fn get_file_sync(
    conn: &Connection,
    project_id: i64,
    path: &str,
) -> rusqlite::Result<Option<FileRow>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE project_id = ?1 AND path = ?2"),
        params![project_id, path],
        file_from_row,
    )
    .optional()
}

/// Files ordered the way the fragility scan consumes them:
/// worst-known first, then most-changed.
pub fn files_for_fragility_scan_sync(
    conn: &Connection,
    project_id: i64,
    max_files: usize,
) -> rusqlite::Result<Vec<FileRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FILE_COLUMNS} FROM files
         WHERE project_id = ?1 AND archived_at IS NULL
         ORDER BY fragility DESC, change_count DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, max_files as i64], file_from_row)?;
    rows.collect()
}

/// Persist a computed fragility score with its signal breakdown.
pub fn store_fragility_sync(
    conn: &Connection,
    file_id: i64,
    fragility: i64,
    signals_json: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE files SET fragility = ?1, fragility_signals = ?2,
             fragility_computed_at = datetime('now')
         WHERE id = ?3",
        params![fragility, signals_json, file_id],
    )?;
    Ok(())
}

/// Record an observed edit: bumps change_count and touches updated_at.
pub fn record_file_change_sync(
    conn: &Connection,
    project_id: i64,
    path: &str,
) -> rusqlite::Result<i64> {
    let file_id = upsert_file_sync(conn, project_id, path, None, None)?;
    conn.execute(
        "UPDATE files SET change_count = change_count + 1, updated_at = datetime('now')
         WHERE id = ?1",
        [file_id],
    )?;
    Ok(file_id)
}

/// Mark a file archived (files are never deleted).
pub fn archive_file_sync(conn: &Connection, project_id: i64, path: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE files SET archived_at = datetime('now')
         WHERE project_id = ?1 AND path = ?2 AND archived_at IS NULL",
        params![project_id, path],
    )?;
    Ok(changed > 0)
}

/// Changes per week over the last 30 days, from tool-call observations.
pub fn weekly_change_rate_sync(
    conn: &Connection,
    project_id: i64,
    path: &str,
) -> rusqlite::Result<f64> {
    let changes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tool_calls
         WHERE project_id = ?1
           AND (',' || files_involved || ',') LIKE '%,' || ?2 || ',%'
           AND created_at >= datetime('now', '-30 days')",
        params![project_id, path],
        |row| row.get(0),
    )?;
    Ok(changes as f64 / (30.0 / 7.0))
}

/// Replace the symbol set for a file with observed counts.
pub fn replace_symbols_sync(
    conn: &Connection,
    project_id: i64,
    file_id: i64,
    symbols: &[(String, bool)],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM symbols WHERE file_id = ?1", [file_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO symbols (project_id, file_id, name, is_exported) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (name, is_exported) in symbols {
        stmt.execute(params![project_id, file_id, name, *is_exported as i64])?;
    }
    Ok(())
}

/// (total symbols, exported symbols) for a file.
pub fn symbol_counts_sync(conn: &Connection, file_id: i64) -> rusqlite::Result<(i64, i64)> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(is_exported), 0) FROM symbols WHERE file_id = ?1",
        [file_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}
