// crates/muninn-server/src/db/decisions.rs
// Decision records and outcome transitions.
//
// outcome_status moves pending -> {success|failed|revised|reverted} exactly
// once; after that the row may only be archived.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::{DecisionRow, parse_string_array};

const DECISION_COLUMNS: &str = "id, title, decision, reasoning, affects, status, \
                                outcome_status, outcome_notes, created_at";

fn decision_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionRow> {
    Ok(DecisionRow {
        id: row.get(0)?,
        title: row.get(1)?,
        decision: row.get(2)?,
        reasoning: row.get(3)?,
        affects: parse_string_array(row.get(4)?),
        status: row.get(5)?,
        outcome_status: row.get(6)?,
        outcome_notes: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn add_decision_sync(
    conn: &Connection,
    project_id: i64,
    title: &str,
    decision: &str,
    reasoning: &str,
    affects: &[String],
) -> rusqlite::Result<i64> {
    let affects_json = serde_json::to_string(affects).unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO decisions (project_id, title, decision, reasoning, affects)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, title, decision, reasoning, affects_json],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_decision_sync(
    conn: &Connection,
    decision_id: i64,
) -> rusqlite::Result<Option<DecisionRow>> {
    conn.query_row(
        &format!("SELECT {DECISION_COLUMNS} FROM decisions WHERE id = ?1"),
        [decision_id],
        decision_from_row,
    )
    .optional()
}

/// Record a decision outcome. The transition is one-way: only a pending
/// decision accepts one, and only the four terminal states are valid.
pub fn set_decision_outcome_sync(
    conn: &Connection,
    decision_id: i64,
    outcome_status: &str,
    notes: Option<&str>,
) -> rusqlite::Result<bool> {
    if !matches!(outcome_status, "success" | "failed" | "revised" | "reverted") {
        return Err(rusqlite::Error::InvalidParameterName(format!(
            "invalid outcome_status: {outcome_status}"
        )));
    }
    let changed = conn.execute(
        "UPDATE decisions
         SET outcome_status = ?1, outcome_notes = ?2, outcome_at = datetime('now'),
             updated_at = datetime('now')
         WHERE id = ?3 AND outcome_status = 'pending'",
        params![outcome_status, notes, decision_id],
    )?;
    Ok(changed > 0)
}

/// Archive a decision that already has a terminal outcome.
pub fn archive_decision_sync(conn: &Connection, decision_id: i64) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE decisions SET status = 'archived', updated_at = datetime('now')
         WHERE id = ?1 AND outcome_status != 'pending'",
        [decision_id],
    )?;
    Ok(changed > 0)
}

/// Active decisions whose affects list mentions one of the given files.
pub fn decisions_for_files_sync(
    conn: &Connection,
    project_id: i64,
    files: &[String],
    limit: usize,
) -> rusqlite::Result<Vec<DecisionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DECISION_COLUMNS} FROM decisions
         WHERE project_id = ?1 AND status = 'active'
         ORDER BY created_at DESC"
    ))?;
    let rows = stmt.query_map([project_id], decision_from_row)?;
    let mut hits = Vec::new();
    for row in rows {
        let decision = row?;
        if decision.affects.iter().any(|a| files.contains(a)) {
            hits.push(decision);
            if hits.len() >= limit {
                break;
            }
        }
    }
    Ok(hits)
}

/// Decisions whose recorded outcome was failed or reverted: prior attempts
/// the agent should not repeat.
pub fn failed_decisions_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<DecisionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DECISION_COLUMNS} FROM decisions
         WHERE project_id = ?1 AND outcome_status IN ('failed', 'reverted')
         ORDER BY outcome_at DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], decision_from_row)?;
    rows.collect()
}
