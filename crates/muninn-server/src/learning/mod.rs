// crates/muninn-server/src/learning/mod.rs
// The session-end learning pipeline.
//
// Five independent passes run when a session ends: outcome inference,
// context feedback, retrieval calibration, confidence reinforcement, and
// trace extraction, with strategy distillation and A/B accounting riding
// along. Each pass tolerates missing tables (older schemas) by swallowing
// the error into a counter, and the whole pipeline is idempotent per
// session: the stored reasoning trace is the processed marker.

pub mod experiments;
pub mod feedback;
pub mod outcome;
pub mod reinforcement;
pub mod strategies;
pub mod traces;

use rusqlite::Connection;

use crate::db;
use crate::metrics;

pub use experiments::{Arm, Verdict, assign_arm};
pub use outcome::{infer_outcome, outcome_label, outcome_score, success_from_score};
pub use reinforcement::{Reinforcement, stabilizing_factor, updated_confidence};
pub use strategies::{distill_strategies_sync, match_strategies_sync};
pub use traces::extract_trace;

/// Distill strategies every this many sessions.
const DISTILL_EVERY: i64 = 5;

/// What the pipeline did for one session.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineReport {
    pub session_id: i64,
    /// True when the session had already been processed.
    pub skipped: bool,
    pub outcome_score: f64,
    pub success: i64,
    pub injections_marked: usize,
    pub feedback_rows: usize,
    pub learnings_reinforced: usize,
    pub trace_stored: bool,
    pub strategies_distilled: usize,
    pub ab_verdict: Option<String>,
}

/// Run the full pipeline for one ended session.
pub fn run_session_pipeline_sync(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
) -> rusqlite::Result<PipelineReport> {
    let mut report = PipelineReport {
        session_id,
        ..Default::default()
    };

    let Some(session) = db::get_session_sync(conn, session_id)? else {
        report.skipped = true;
        return Ok(report);
    };
    if session.ended_at.is_none() {
        report.skipped = true;
        return Ok(report);
    }

    // The stored trace is the processed marker: its UNIQUE(session_id)
    // makes a repeated end yield the same artefacts.
    let already_processed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reasoning_traces WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;
    if already_processed > 0 {
        report.skipped = true;
        return Ok(report);
    }

    // 6a. Outcome inference. The client's explicit success wins; inference
    // fills the gap and writes the canonical numeric level.
    let signals = db::session_signals_sync(conn, session_id)?;
    let (score, success) = outcome::infer_outcome(&signals, session.success);
    report.outcome_score = score;
    report.success = success;
    if session.success.is_none() {
        conn.execute(
            "UPDATE sessions SET success = ?1, outcome = COALESCE(outcome, ?2) WHERE id = ?3",
            rusqlite::params![success, outcome::outcome_label(success), session_id],
        )?;
    }

    // Observed edits feed change_count; files are created on first sight.
    for file in &session.files_touched {
        if let Err(e) = db::record_file_change_sync(conn, project_id, file) {
            metrics::count_suppressed("learning.file_change", &e);
        }
    }

    // 6b. Context feedback.
    match feedback::mark_used_injections_sync(conn, project_id, session_id) {
        Ok(marked) => report.injections_marked = marked,
        Err(e) => metrics::count_suppressed("learning.feedback.mark", &e),
    }
    if let Err(e) = feedback::emit_budget_recommendations_sync(conn, project_id) {
        metrics::count_suppressed("learning.feedback.recommend", &e);
    }

    // 6c. Retrieval calibration.
    match feedback::calibrate_retrieval_sync(conn, project_id, session_id) {
        Ok(rows) => report.feedback_rows = rows,
        Err(e) => metrics::count_suppressed("learning.calibration", &e),
    }

    // 6d. Bayesian reinforcement.
    match reinforcement::reinforce_session_learnings_sync(conn, session_id, success) {
        Ok(updated) => report.learnings_reinforced = updated,
        Err(e) => metrics::count_suppressed("learning.reinforcer.update", &e),
    }

    // 6e. Trace extraction. Sessions too short for a trace still get an
    // empty artefact so the processed marker exists.
    let calls = db::session_tool_calls_sync(conn, session_id)?;
    let label = outcome::outcome_label(success);
    let record = traces::extract_trace(&calls, Some(label)).unwrap_or(db::TraceRecord {
        problem_signature: vec![],
        dead_ends: vec![],
        hypothesis_chain: vec![],
        breakthrough: None,
        strategy_tags: vec![],
        duration_ms: 0,
    });
    match db::store_trace_sync(conn, project_id, session_id, &record, Some(label)) {
        Ok(stored) => report.trace_stored = stored.is_some(),
        Err(e) => metrics::count_suppressed("learning.trace.store", &e),
    }

    // 6f. Strategy distillation, every N sessions.
    if session_id % DISTILL_EVERY == 0 {
        match strategies::distill_strategies_sync(conn, project_id) {
            Ok(touched) => report.strategies_distilled = touched.len(),
            Err(e) => metrics::count_suppressed("learning.distiller", &e),
        }
    }

    // 6g. A/B accounting with the outcome score as the metric.
    match experiments::record_session_metric_sync(conn, project_id, session_id, score) {
        Ok(verdict) => report.ab_verdict = verdict.map(|v| v.describe()),
        Err(e) => metrics::count_suppressed("learning.ab.record", &e),
    }

    Ok(report)
}

/// Process every ended-but-unprocessed session of a project.
pub fn process_pending_sessions_sync(
    conn: &Connection,
    project_id: i64,
    limit: usize,
) -> rusqlite::Result<Vec<PipelineReport>> {
    let pending = db::sessions_needing_learning_sync(conn, project_id, limit)?;
    let mut reports = Vec::with_capacity(pending.len());
    for session in pending {
        reports.push(run_session_pipeline_sync(conn, project_id, session.id)?);
    }
    Ok(reports)
}
