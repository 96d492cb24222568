// crates/muninn-server/src/learning/feedback.rs
// Context-injection feedback and retrieval calibration.
//
// Pass one marks which injected items a session actually used, then turns
// per-kind usage stats into budget recommendations. Pass two compares the
// files that predict/suggest/enrich proposed against the files the session
// touched and aggregates per-kind suggestion accuracy.

use rusqlite::Connection;
use std::collections::BTreeMap;

use crate::context::BudgetCategory;
use crate::db;

/// Stats window, in ended sessions.
const SESSION_WINDOW: usize = 30;

/// Recommendation thresholds.
const PUSH_USE_RATE: f64 = 0.7;
const PUSH_SUCCESS_CORRELATION: f64 = 0.6;
const PULL_USE_RATE: f64 = 0.3;
const PULL_MIN_TOTAL: i64 = 10;
const PUSH_CAP: i64 = 600;
const PULL_FLOOR: i64 = 100;

/// Tools whose file proposals are scored by retrieval calibration.
const SUGGESTING_TOOLS: [&str; 3] = ["predict", "suggest", "enrich"];

/// Minimum suggestions before calibration engages.
const MIN_SUGGESTIONS: i64 = 5;

/// Mark injections used: a file injection is used when its file was
/// touched; decision and learning injections count as used once surfaced.
pub fn mark_used_injections_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
) -> rusqlite::Result<usize> {
    let touched = db::session_files_touched_sync(conn, session_id)?;
    let injections = db::session_injections_sync(conn, session_id)?;
    let mut marked = 0;

    for injection in injections {
        if injection.was_used {
            continue;
        }
        let used = match injection.context_type.as_str() {
            "decision" | "learning" => true,
            "file" => match injection.source_id {
                Some(file_id) => file_path_for_id(conn, project_id, file_id)?
                    .map(|path| touched.contains(&path))
                    .unwrap_or(false),
                None => false,
            },
            _ => false,
        };
        if used {
            db::mark_injection_used_sync(conn, injection.id)?;
            marked += 1;
        }
    }
    Ok(marked)
}

fn file_path_for_id(
    conn: &Connection,
    project_id: i64,
    file_id: i64,
) -> rusqlite::Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT path FROM files WHERE id = ?1 AND project_id = ?2",
        rusqlite::params![file_id, project_id],
        |row| row.get(0),
    )
    .optional()
}

/// Current budget for a category: learned recommendation or default.
fn current_budget_sync(
    conn: &Connection,
    project_id: i64,
    category: BudgetCategory,
) -> rusqlite::Result<i64> {
    let overrides = crate::context::load_overrides_sync(conn, project_id)?;
    Ok(overrides
        .get(&category)
        .copied()
        .unwrap_or_else(|| category.default_tokens()))
}

/// Turn per-kind stats into budget recommendations.
/// Returns the kinds whose recommendations changed.
pub fn emit_budget_recommendations_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<Vec<String>> {
    let stats = db::injection_stats_by_kind_sync(conn, project_id, SESSION_WINDOW)?;
    let mut changed = Vec::new();

    for (kind, kind_stats) in stats {
        let Some(category) = BudgetCategory::from_kind(&kind) else {
            continue;
        };
        let current = current_budget_sync(conn, project_id, category)?;
        let use_rate = kind_stats.use_rate();

        let recommended = if use_rate >= PUSH_USE_RATE
            && kind_stats.success_correlation >= PUSH_SUCCESS_CORRELATION
        {
            Some(PUSH_CAP.min((current as f64 * 1.3).floor() as i64))
        } else if use_rate < PULL_USE_RATE && kind_stats.total >= PULL_MIN_TOTAL {
            Some(PULL_FLOOR.max((current as f64 * 0.7).floor() as i64))
        } else {
            None
        };

        if let Some(budget) = recommended
            && budget != current
        {
            db::upsert_budget_recommendation_sync(
                conn,
                project_id,
                category.as_ref(),
                budget,
                use_rate,
            )?;
            changed.push(kind);
        }
    }
    Ok(changed)
}

/// Compare suggested files against touched files and append feedback rows.
/// Skipped when feedback already exists for the session (idempotence) or
/// when nothing was suggested.
pub fn calibrate_retrieval_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
) -> rusqlite::Result<usize> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM retrieval_feedback WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(0);
    }

    let touched = db::session_files_touched_sync(conn, session_id)?;
    let calls = db::session_tool_calls_sync(conn, session_id)?;
    let mut appended = 0;

    for call in calls {
        let tool = call.tool_name.to_lowercase();
        let Some(kind) = SUGGESTING_TOOLS
            .iter()
            .find(|t| tool == **t || tool.ends_with(&format!("_{t}")))
        else {
            continue;
        };
        for file in &call.files_involved {
            let used = touched.contains(file);
            db::record_retrieval_feedback_sync(
                conn,
                project_id,
                session_id,
                kind,
                file,
                true,
                used,
                if used { 1.0 } else { 0.0 },
            )?;
            appended += 1;
        }
    }
    Ok(appended)
}

/// Per-kind retrieval weight multipliers from accumulated accuracy.
/// Kinds below the sample floor keep the neutral 1.0.
pub fn retrieval_weights_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<BTreeMap<String, f64>> {
    let accuracy = db::retrieval_accuracy_by_kind_sync(conn, project_id)?;
    Ok(accuracy
        .into_iter()
        .map(|(kind, (suggested, rate))| {
            let weight = if suggested < MIN_SUGGESTIONS {
                1.0
            } else if rate >= 0.7 {
                1.2
            } else if rate >= 0.4 {
                1.0
            } else {
                0.8
            };
            (kind, weight)
        })
        .collect())
}
