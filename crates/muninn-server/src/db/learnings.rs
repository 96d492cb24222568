// crates/muninn-server/src/db/learnings.rs
// Learning records and confidence bookkeeping.
//
// Confidence lives in [0.5, 10.0] and is only moved by the Bayesian
// reinforcer; this module enforces the clamp at the storage boundary so no
// caller can write an out-of-range value.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::LearningRow;

pub const MIN_CONFIDENCE: f64 = 0.5;
pub const MAX_CONFIDENCE: f64 = 10.0;

const LEARNING_COLUMNS: &str =
    "id, title, content, category, context, confidence, times_applied, foundational";

fn learning_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningRow> {
    Ok(LearningRow {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        context: row.get(4)?,
        confidence: row.get(5)?,
        times_applied: row.get(6)?,
        foundational: row.get::<_, i64>(7)? != 0,
    })
}

pub struct AddLearningParams<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub category: &'a str,
    pub context: &'a str,
    pub confidence: f64,
    pub foundational: bool,
    pub review_after: Option<&'a str>,
}

pub fn add_learning_sync(
    conn: &Connection,
    project_id: i64,
    params: AddLearningParams<'_>,
) -> rusqlite::Result<i64> {
    let confidence = params.confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
    conn.execute(
        "INSERT INTO learnings (project_id, title, content, category, context, confidence, foundational, review_after)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            project_id,
            params.title,
            params.content,
            params.category,
            params.context,
            confidence,
            params.foundational as i64,
            params.review_after,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_learning_sync(
    conn: &Connection,
    learning_id: i64,
) -> rusqlite::Result<Option<LearningRow>> {
    conn.query_row(
        &format!("SELECT {LEARNING_COLUMNS} FROM learnings WHERE id = ?1"),
        [learning_id],
        learning_from_row,
    )
    .optional()
}

/// Write a reinforced confidence value and bump times_applied.
/// The clamp is re-applied here as the last line of defence.
pub fn update_confidence_sync(
    conn: &Connection,
    learning_id: i64,
    new_confidence: f64,
) -> rusqlite::Result<()> {
    let clamped = new_confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
    conn.execute(
        "UPDATE learnings
         SET confidence = ?1, times_applied = times_applied + 1, updated_at = datetime('now')
         WHERE id = ?2",
        params![clamped, learning_id],
    )?;
    Ok(())
}

/// Highest-confidence learnings for a project.
pub fn top_learnings_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<LearningRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEARNING_COLUMNS} FROM learnings
         WHERE project_id = ?1
         ORDER BY confidence DESC, times_applied DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], learning_from_row)?;
    rows.collect()
}

/// Learnings whose context mentions one of the given files.
pub fn learnings_for_files_sync(
    conn: &Connection,
    project_id: i64,
    files: &[String],
    limit: usize,
) -> rusqlite::Result<Vec<LearningRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LEARNING_COLUMNS} FROM learnings
         WHERE project_id = ?1
         ORDER BY confidence DESC"
    ))?;
    let rows = stmt.query_map([project_id], learning_from_row)?;
    let mut hits = Vec::new();
    for row in rows {
        let learning = row?;
        if files.iter().any(|f| learning.context.contains(f.as_str())) {
            hits.push(learning);
            if hits.len() >= limit {
                break;
            }
        }
    }
    Ok(hits)
}

/// Learnings past their review_after date: the allocator treats these as
/// stale when sizing the decisions/learnings categories.
pub fn stale_learning_ids_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM learnings
         WHERE project_id = ?1
           AND review_after IS NOT NULL
           AND review_after <= datetime('now')",
    )?;
    let rows = stmt.query_map([project_id], |row| row.get(0))?;
    rows.collect()
}
