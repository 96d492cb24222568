// crates/muninn-server/src/db/strategies.rs
// Reasoning-trace and strategy-catalog persistence.

use rusqlite::{Connection, OptionalExtension, params};

use super::types::{StrategyRow, TraceRecord, TraceRow};

/// Store a reasoning trace for a session. The UNIQUE(session_id) constraint
/// makes the pipeline idempotent: a repeated session end keeps the first
/// artefact.
pub fn store_trace_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    record: &TraceRecord,
    outcome: Option<&str>,
) -> rusqlite::Result<Option<i64>> {
    let changed = conn.execute(
        "INSERT INTO reasoning_traces
             (project_id, session_id, problem_signature, dead_ends, hypothesis_chain,
              breakthrough, strategy_tags, duration_ms, outcome)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(session_id) DO NOTHING",
        params![
            project_id,
            session_id,
            serde_json::to_string(&record.problem_signature).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&record.dead_ends).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(&record.hypothesis_chain).unwrap_or_else(|_| "[]".into()),
            record.breakthrough,
            serde_json::to_string(&record.strategy_tags).unwrap_or_else(|_| "[]".into()),
            record.duration_ms,
            outcome,
        ],
    )?;
    Ok((changed > 0).then(|| conn.last_insert_rowid()))
}

fn trace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TraceRow> {
    let parse_list = |raw: String| -> Vec<String> {
        serde_json::from_str(&raw).unwrap_or_default()
    };
    Ok(TraceRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        record: TraceRecord {
            problem_signature: parse_list(row.get(2)?),
            dead_ends: parse_list(row.get(3)?),
            hypothesis_chain: parse_list(row.get(4)?),
            breakthrough: row.get(5)?,
            strategy_tags: parse_list(row.get(6)?),
            duration_ms: row.get(7)?,
        },
        outcome: row.get(8)?,
    })
}

/// Most recent traces for a project, newest first.
pub fn recent_traces_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<TraceRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, problem_signature, dead_ends, hypothesis_chain,
                breakthrough, strategy_tags, duration_ms, outcome
         FROM reasoning_traces
         WHERE project_id = ?1
         ORDER BY id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![project_id, limit as i64], trace_from_row)?;
    rows.collect()
}

fn strategy_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StrategyRow> {
    Ok(StrategyRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        success_rate: row.get(3)?,
        times_used: row.get(4)?,
        avg_duration_ms: row.get(5)?,
        source_trace_ids: serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
    })
}

const STRATEGY_COLUMNS: &str =
    "id, name, description, success_rate, times_used, avg_duration_ms, source_trace_ids";

pub fn get_strategy_by_name_sync(
    conn: &Connection,
    project_id: i64,
    name: &str,
) -> rusqlite::Result<Option<StrategyRow>> {
    conn.query_row(
        &format!(
            "SELECT {STRATEGY_COLUMNS} FROM strategy_catalog
             WHERE project_id = ?1 AND name = ?2"
        ),
        params![project_id, name],
        strategy_from_row,
    )
    .optional()
}

pub struct UpsertStrategyParams<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub success_rate: f64,
    pub times_used: i64,
    pub avg_duration_ms: i64,
    pub source_trace_ids: &'a [i64],
}

/// Create or update a catalog entry by (project, name).
pub fn upsert_strategy_sync(
    conn: &Connection,
    project_id: i64,
    params: UpsertStrategyParams<'_>,
) -> rusqlite::Result<i64> {
    let trace_ids =
        serde_json::to_string(params.source_trace_ids).unwrap_or_else(|_| "[]".into());
    conn.execute(
        "INSERT INTO strategy_catalog
             (project_id, name, description, success_rate, times_used, avg_duration_ms, source_trace_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(project_id, name) DO UPDATE SET
            description = ?3,
            success_rate = ?4,
            times_used = ?5,
            avg_duration_ms = ?6,
            source_trace_ids = ?7,
            updated_at = datetime('now')",
        rusqlite::params![
            project_id,
            params.name,
            params.description,
            params.success_rate.clamp(0.0, 1.0),
            params.times_used,
            params.avg_duration_ms,
            trace_ids,
        ],
    )?;
    conn.query_row(
        "SELECT id FROM strategy_catalog WHERE project_id = ?1 AND name = ?2",
        rusqlite::params![project_id, params.name],
        |row| row.get(0),
    )
}

/// Top strategies by observed success, then usage.
pub fn top_strategies_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<StrategyRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STRATEGY_COLUMNS} FROM strategy_catalog
         WHERE project_id = ?1
         ORDER BY success_rate DESC, times_used DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], strategy_from_row)?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions::{end_session_sync, start_session_sync};
    use crate::db::test_support::{seed_project, setup_test_connection};

    fn sample_record() -> TraceRecord {
        TraceRecord {
            problem_signature: vec!["parser".into(), "tokens".into()],
            dead_ends: vec![],
            hypothesis_chain: vec!["Shifted from src to tests".into()],
            breakthrough: Some("read -> edit -> test (src/parser.rs)".into()),
            strategy_tags: vec!["test-first".into()],
            duration_ms: 90_000,
        }
    }

    #[test]
    fn test_trace_is_stored_once_per_session() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        let session = start_session_sync(&conn, project_id, None).unwrap();
        end_session_sync(&conn, session, None, Some(2), &[]).unwrap();

        let first = store_trace_sync(&conn, project_id, session, &sample_record(), Some("success"))
            .unwrap();
        assert!(first.is_some());
        let second = store_trace_sync(&conn, project_id, session, &sample_record(), Some("success"))
            .unwrap();
        assert!(second.is_none());

        let traces = recent_traces_sync(&conn, project_id, 10).unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].record.strategy_tags, vec!["test-first"]);
    }

    #[test]
    fn test_strategy_upsert_by_name() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);

        let a = upsert_strategy_sync(
            &conn,
            project_id,
            UpsertStrategyParams {
                name: "test-first",
                description: "run tests before editing",
                success_rate: 0.7,
                times_used: 3,
                avg_duration_ms: 60_000,
                source_trace_ids: &[1, 2, 3],
            },
        )
        .unwrap();

        let b = upsert_strategy_sync(
            &conn,
            project_id,
            UpsertStrategyParams {
                name: "test-first",
                description: "run tests before editing",
                success_rate: 0.75,
                times_used: 4,
                avg_duration_ms: 55_000,
                source_trace_ids: &[1, 2, 3, 9],
            },
        )
        .unwrap();
        assert_eq!(a, b);

        let strategy = get_strategy_by_name_sync(&conn, project_id, "test-first")
            .unwrap()
            .unwrap();
        assert_eq!(strategy.times_used, 4);
        assert_eq!(strategy.source_trace_ids, vec![1, 2, 3, 9]);
    }

    #[test]
    fn test_success_rate_clamped_to_unit_interval() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        upsert_strategy_sync(
            &conn,
            project_id,
            UpsertStrategyParams {
                name: "x",
                description: "",
                success_rate: 3.0,
                times_used: 1,
                avg_duration_ms: 0,
                source_trace_ids: &[],
            },
        )
        .unwrap();
        let strategy = get_strategy_by_name_sync(&conn, project_id, "x").unwrap().unwrap();
        assert_eq!(strategy.success_rate, 1.0);
    }

    #[test]
    fn test_top_strategies_ordering() {
        let conn = setup_test_connection();
        let project_id = seed_project(&conn);
        for (name, rate, used) in [("a", 0.9, 2), ("b", 0.9, 5), ("c", 0.5, 100)] {
            upsert_strategy_sync(
                &conn,
                project_id,
                UpsertStrategyParams {
                    name,
                    description: "",
                    success_rate: rate,
                    times_used: used,
                    avg_duration_ms: 0,
                    source_trace_ids: &[],
                },
            )
            .unwrap();
        }

        let top = top_strategies_sync(&conn, project_id, 2).unwrap();
        let names: Vec<&str> = top.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
