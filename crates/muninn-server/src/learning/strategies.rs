// crates/muninn-server/src/learning/strategies.rs
// Strategy distillation from reasoning traces, and query-time matching.
//
// A strategy tag earns a catalog entry once it has enough supporting traces
// with a good enough success rate. Updates are smoothed with the same
// diminishing-returns rule the learning reinforcer uses.

use rusqlite::Connection;
use std::collections::BTreeMap;

use crate::db::{self, StrategyRow, TraceRow, UpsertStrategyParams};

/// Traces needed before a tag becomes a strategy.
const MIN_TRACES: usize = 3;
/// Success rate a tag must clear.
const MIN_SUCCESS_RATE: f64 = 0.6;
/// How many recent traces distillation looks at.
const TRACE_WINDOW: usize = 100;

fn trace_succeeded(trace: &TraceRow) -> bool {
    trace.outcome.as_deref() == Some("success")
}

/// Smoothed update toward an observed value.
fn smooth(old: f64, observed: f64, times_used: i64) -> f64 {
    old + (observed - old) / ((times_used.max(0) + 1) as f64).sqrt()
}

/// Distill the recent traces into catalog entries.
/// Returns the names of strategies created or updated.
pub fn distill_strategies_sync(
    conn: &Connection,
    project_id: i64,
) -> rusqlite::Result<Vec<String>> {
    let traces = db::recent_traces_sync(conn, project_id, TRACE_WINDOW)?;

    let mut by_tag: BTreeMap<String, Vec<&TraceRow>> = BTreeMap::new();
    for trace in &traces {
        for tag in &trace.record.strategy_tags {
            by_tag.entry(tag.clone()).or_default().push(trace);
        }
    }

    let mut touched = Vec::new();
    for (tag, group) in by_tag {
        if group.len() < MIN_TRACES {
            continue;
        }
        let successes = group.iter().filter(|t| trace_succeeded(t)).count();
        let observed_rate = successes as f64 / group.len() as f64;
        if observed_rate < MIN_SUCCESS_RATE {
            continue;
        }
        let observed_duration =
            group.iter().map(|t| t.record.duration_ms).sum::<i64>() / group.len() as i64;
        let trace_ids: Vec<i64> = group.iter().map(|t| t.id).collect();
        let description = describe_tag(&tag);

        match db::get_strategy_by_name_sync(conn, project_id, &tag)? {
            Some(existing) => {
                let success_rate = smooth(existing.success_rate, observed_rate, existing.times_used);
                let avg_duration = smooth(
                    existing.avg_duration_ms as f64,
                    observed_duration as f64,
                    existing.times_used,
                ) as i64;
                db::upsert_strategy_sync(
                    conn,
                    project_id,
                    UpsertStrategyParams {
                        name: &tag,
                        description: &description,
                        success_rate,
                        times_used: existing.times_used + 1,
                        avg_duration_ms: avg_duration,
                        source_trace_ids: &trace_ids,
                    },
                )?;
            }
            None => {
                db::upsert_strategy_sync(
                    conn,
                    project_id,
                    UpsertStrategyParams {
                        name: &tag,
                        description: &description,
                        success_rate: observed_rate,
                        times_used: 1,
                        avg_duration_ms: observed_duration,
                        source_trace_ids: &trace_ids,
                    },
                )?;
            }
        }
        touched.push(tag);
    }

    Ok(touched)
}

fn describe_tag(tag: &str) -> String {
    match tag {
        "read-first" => "Read the relevant code before any modification".to_string(),
        "test-driven" => "Run tests, edit, then run tests again".to_string(),
        "search-narrow" => "Search broadly, then read the hits closely".to_string(),
        "edit-verify" => "Follow every edit with a verification step".to_string(),
        "error-driven" => "Let the error output steer the investigation".to_string(),
        "checkpoint" => "Record decisions and file knowledge as you go".to_string(),
        other => format!("Observed tool pattern: {other}"),
    }
}

/// Query-time matching: take the top 10 by success then usage, re-rank by
/// keyword relevance (name hit +2, description hit +1), return the best.
pub fn match_strategies_sync(
    conn: &Connection,
    project_id: i64,
    task: &str,
    limit: usize,
) -> rusqlite::Result<Vec<StrategyRow>> {
    let candidates = db::top_strategies_sync(conn, project_id, 10)?;
    let keywords: Vec<String> = task
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(|w| w.to_lowercase())
        .collect();

    let mut scored: Vec<(i64, usize, StrategyRow)> = candidates
        .into_iter()
        .enumerate()
        .map(|(position, strategy)| {
            let name = strategy.name.to_lowercase();
            let description = strategy.description.to_lowercase();
            let mut score = 0i64;
            for keyword in &keywords {
                if name.contains(keyword.as_str()) {
                    score += 2;
                }
                if description.contains(keyword.as_str()) {
                    score += 1;
                }
            }
            (score, position, strategy)
        })
        .collect();

    // Keyword score first; original (success, usage) order breaks ties.
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    Ok(scored.into_iter().take(limit).map(|(_, _, s)| s).collect())
}
