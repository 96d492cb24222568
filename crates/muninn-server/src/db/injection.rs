// crates/muninn-server/src/db/injection.rs
// Context-injection tracking and retrieval feedback.
//
// The router records what it surfaced; the learning pipeline later marks
// which injections were actually used and aggregates per-kind statistics.
// Both tables are append-only within a session window.

use rusqlite::{Connection, params};
use std::collections::BTreeMap;

use super::types::InjectionRow;

/// Record one surfaced context item for a session.
pub fn record_injection_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    context_type: &str,
    source_id: Option<i64>,
    relevance_score: f64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO context_injections
             (project_id, session_id, context_type, source_id, relevance_score)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![project_id, session_id, context_type, source_id, relevance_score],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All injections recorded for a session.
pub fn session_injections_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<Vec<InjectionRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, context_type, source_id, was_used, relevance_score
         FROM context_injections WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], |row| {
        Ok(InjectionRow {
            id: row.get(0)?,
            session_id: row.get(1)?,
            context_type: row.get(2)?,
            source_id: row.get(3)?,
            was_used: row.get::<_, i64>(4)? != 0,
            relevance_score: row.get(5)?,
        })
    })?;
    rows.collect()
}

/// Mark a single injection as used.
pub fn mark_injection_used_sync(conn: &Connection, injection_id: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE context_injections SET was_used = 1 WHERE id = ?1",
        [injection_id],
    )?;
    Ok(())
}

/// Per-kind usage statistics over the last `session_window` ended sessions.
#[derive(Debug, Clone, Default)]
pub struct InjectionKindStats {
    pub total: i64,
    pub used: i64,
    pub avg_relevance: f64,
    /// Share of this kind's injections that landed in sessions which ended
    /// with numeric success = 2.
    pub success_correlation: f64,
}

impl InjectionKindStats {
    pub fn use_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64
        }
    }
}

/// Aggregate injection stats per context kind over recent sessions.
pub fn injection_stats_by_kind_sync(
    conn: &Connection,
    project_id: i64,
    session_window: usize,
) -> rusqlite::Result<BTreeMap<String, InjectionKindStats>> {
    let mut stmt = conn.prepare(
        "SELECT ci.context_type, ci.was_used, ci.relevance_score, s.success
         FROM context_injections ci
         JOIN sessions s ON s.id = ci.session_id
         WHERE ci.project_id = ?1
           AND ci.session_id IN (
               SELECT id FROM sessions
               WHERE project_id = ?1 AND ended_at IS NOT NULL
               ORDER BY id DESC LIMIT ?2
           )",
    )?;
    let rows = stmt.query_map(params![project_id, session_window as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)? != 0,
            row.get::<_, f64>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let mut stats: BTreeMap<String, InjectionKindStats> = BTreeMap::new();
    let mut relevance_sums: BTreeMap<String, f64> = BTreeMap::new();
    let mut success_counts: BTreeMap<String, i64> = BTreeMap::new();

    for row in rows {
        let (kind, was_used, relevance, success) = row?;
        let entry = stats.entry(kind.clone()).or_default();
        entry.total += 1;
        if was_used {
            entry.used += 1;
        }
        *relevance_sums.entry(kind.clone()).or_insert(0.0) += relevance;
        if success == Some(2) {
            *success_counts.entry(kind).or_insert(0) += 1;
        }
    }

    for (kind, entry) in stats.iter_mut() {
        entry.avg_relevance = relevance_sums.get(kind).copied().unwrap_or(0.0)
            / entry.total.max(1) as f64;
        entry.success_correlation =
            success_counts.get(kind).copied().unwrap_or(0) as f64 / entry.total.max(1) as f64;
    }

    Ok(stats)
}

/// Append one retrieval-feedback row.
#[allow(clippy::too_many_arguments)]
pub fn record_retrieval_feedback_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    context_type: &str,
    item_path: &str,
    was_suggested: bool,
    was_used: bool,
    relevance_score: f64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO retrieval_feedback
             (project_id, session_id, context_type, item_path, was_suggested, was_used, relevance_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project_id,
            session_id,
            context_type,
            item_path,
            was_suggested as i64,
            was_used as i64,
            relevance_score
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Per-kind suggestion accuracy: used / suggested.
pub fn retrieval_accuracy_by_kind_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<BTreeMap<String, (i64, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT context_type,
                COUNT(*) AS suggested,
                COALESCE(SUM(was_used), 0) AS used
         FROM retrieval_feedback
         WHERE project_id = ?1 AND was_suggested = 1
         GROUP BY context_type",
    )?;
    let rows = stmt.query_map([project_id], |row| {
        let suggested: i64 = row.get(1)?;
        let used: i64 = row.get(2)?;
        Ok((
            row.get::<_, String>(0)?,
            (suggested, used as f64 / suggested.max(1) as f64),
        ))
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions::{end_session_sync, start_session_sync};
    use crate::db::test_support::{seed_project, setup_test_connection};

    #[test]
    fn test_record_and_mark_used() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session = start_session_sync(&conn, project_id, None).unwrap();

        let id = record_injection_sync(&conn, project_id, session, "file", Some(7), 0.8).unwrap();
        record_injection_sync(&conn, project_id, session, "decision", Some(3), 0.5).unwrap();

        mark_injection_used_sync(&conn, id).unwrap();

        let rows = session_injections_sync(&conn, session).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].was_used);
        assert!(!rows[1].was_used);
    }

    #[test]
    fn test_stats_by_kind_counts_success_correlation() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        // Two ended sessions: one success (2), one failed (0)
        let good = start_session_sync(&conn, project_id, None).unwrap();
        let injection =
            record_injection_sync(&conn, project_id, good, "learning", None, 1.0).unwrap();
        mark_injection_used_sync(&conn, injection).unwrap();
        end_session_sync(&conn, good, None, Some(2), &[]).unwrap();

        let bad = start_session_sync(&conn, project_id, None).unwrap();
        record_injection_sync(&conn, project_id, bad, "learning", None, 0.4).unwrap();
        end_session_sync(&conn, bad, None, Some(0), &[]).unwrap();

        let stats = injection_stats_by_kind_sync(&conn, project_id, 30).unwrap();
        let learning = stats.get("learning").unwrap();
        assert_eq!(learning.total, 2);
        assert_eq!(learning.used, 1);
        assert!((learning.use_rate() - 0.5).abs() < 1e-9);
        assert!((learning.success_correlation - 0.5).abs() < 1e-9);
        assert!((learning.avg_relevance - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_stats_ignore_open_sessions() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        let open = start_session_sync(&conn, project_id, None).unwrap();
        record_injection_sync(&conn, project_id, open, "file", None, 1.0).unwrap();

        let stats = injection_stats_by_kind_sync(&conn, project_id, 30).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_retrieval_accuracy() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session = start_session_sync(&conn, project_id, None).unwrap();

        for (path, used) in [("a.rs", true), ("b.rs", true), ("c.rs", false), ("d.rs", false)] {
            record_retrieval_feedback_sync(
                &conn, project_id, session, "predict", path, true, used,
                if used { 1.0 } else { 0.0 },
            )
            .unwrap();
        }

        let accuracy = retrieval_accuracy_by_kind_sync(&conn, project_id).unwrap();
        let (suggested, rate) = accuracy.get("predict").unwrap();
        assert_eq!(*suggested, 4);
        assert!((rate - 0.5).abs() < 1e-9);
    }
}
