// crates/muninn-server/src/context/router.rs
// Per-intent composition of collectors into one bounded context bundle.
//
// The router runs the intent's collector list in order, asks the budget
// allocator for per-category token budgets, trims the bundle to fit, and
// records what survived as context injections for the learning loop.
// A collector failure never fails the request: it is counted and skipped.

use rusqlite::Connection;

use muninn_types::{ContextItem, ContextRequest, Intent, UnifiedContextResult};

use super::budget::{BudgetAllocation, BudgetCategory, allocate_for_session_sync};
use super::collectors::{self, CollectorInput};
use crate::db;
use crate::metrics;

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 + 3) / 4
}

fn item_tokens(item: &ContextItem) -> i64 {
    estimate_tokens(&item.title) + estimate_tokens(&item.body)
}

/// Which budget category pays for an item of this kind.
fn category_for_kind(kind: &str) -> BudgetCategory {
    match kind {
        "contradiction" => BudgetCategory::Contradictions,
        "failed_decision" => BudgetCategory::CriticalWarnings,
        "decision" => BudgetCategory::Decisions,
        "learning" => BudgetCategory::Learnings,
        "cochange" | "test_history" => BudgetCategory::FileContext,
        "error_fix" | "recent_error" => BudgetCategory::ErrorFixes,
        "strategy" => BudgetCategory::Strategies,
        _ => BudgetCategory::Reserve,
    }
}

type Collector = fn(
    &Connection,
    i64,
    &CollectorInput,
    &mut UnifiedContextResult,
) -> rusqlite::Result<()>;

/// The intent composition table. Order matters: earlier collectors fill the
/// bundle first and later ones compete for what budget remains.
fn collectors_for_intent(intent: Intent, input: &CollectorInput) -> Vec<(&'static str, Collector)> {
    let has_query = input.query.as_deref().is_some_and(|q| !q.trim().is_empty());
    let has_text = has_query || input.task.as_deref().is_some_and(|t| !t.trim().is_empty());
    let has_files = !input.files.is_empty();

    let mut plan: Vec<(&'static str, Collector)> = Vec::new();
    match intent {
        Intent::Edit => {
            plan.push(("files", collectors::collect_file_info as Collector));
            plan.push(("test_history", collectors::collect_test_history));
            plan.push(("cochangers", collectors::collect_cochangers));
            plan.push(("contradictions", collectors::collect_contradictions));
            plan.push(("failed_decisions", collectors::collect_failed_decisions));
            plan.push(("file_decisions", collectors::collect_file_decisions));
            plan.push(("file_learnings", collectors::collect_file_learnings));
            plan.push(("file_issues", collectors::collect_file_issues));
        }
        Intent::Read => {
            plan.push(("files", collectors::collect_file_info as Collector));
            if has_query {
                plan.push(("query_results", collectors::collect_query_results));
            } else {
                plan.push(("file_decisions", collectors::collect_file_decisions));
                plan.push(("file_learnings", collectors::collect_file_learnings));
            }
        }
        Intent::Debug => {
            plan.push(("error_fixes", collectors::collect_error_fixes as Collector));
            plan.push(("recent_errors", collectors::collect_recent_errors));
            if has_text {
                plan.push(("query_results", collectors::collect_query_results));
            }
            if has_files {
                plan.push(("files", collectors::collect_file_info));
                plan.push(("test_history", collectors::collect_test_history));
            }
        }
        Intent::Explore => {
            if has_text {
                plan.push(("query_results", collectors::collect_query_results as Collector));
                plan.push(("suggested_files", collectors::collect_suggested_files));
            }
        }
        Intent::Plan => {
            plan.push(("contradictions", collectors::collect_contradictions as Collector));
            plan.push(("failed_decisions", collectors::collect_failed_decisions));
            if has_text {
                plan.push(("query_results", collectors::collect_query_results));
                plan.push(("suggested_files", collectors::collect_suggested_files));
            }
            if has_files {
                plan.push(("files", collectors::collect_file_info));
                plan.push(("cochangers", collectors::collect_cochangers));
            }
            plan.push(("open_issues", collectors::collect_open_issues));
        }
    }
    plan
}

/// Trim the composed bundle to the allocation's per-category budgets and
/// fill in token accounting.
fn apply_budget(result: &mut UnifiedContextResult, allocation: &BudgetAllocation) {
    let mut spent: std::collections::BTreeMap<BudgetCategory, i64> = Default::default();
    let mut tokens_used = 0i64;

    let mut keep = |category: BudgetCategory, cost: i64| -> bool {
        let used = spent.entry(category).or_insert(0);
        if *used + cost > allocation.tokens_for(category) {
            return false;
        }
        *used += cost;
        tokens_used += cost;
        true
    };

    result.warnings.retain(|item| {
        let cost = item_tokens(item);
        keep(category_for_kind(&item.kind), cost)
    });

    result.files.retain(|file| {
        let cost = estimate_tokens(&file.path)
            + estimate_tokens(file.purpose.as_deref().unwrap_or(""))
            + estimate_tokens(file.fragility_reason.as_deref().unwrap_or(""));
        keep(BudgetCategory::FileContext, cost)
    });

    result.context.retain(|item| {
        let cost = item_tokens(item);
        keep(category_for_kind(&item.kind), cost)
    });

    result.meta.tokens_used = tokens_used;
    result.meta.trajectory = allocation
        .trajectory
        .map(|t| t.pattern.as_str().to_string());
    result.meta.stale_item_ids = allocation.stale_item_ids.clone();
}

/// Record what the bundle surfaced so the learning loop can close the loop.
fn record_injections(
    conn: &Connection,
    project_id: i64,
    session_id: i64,
    result: &UnifiedContextResult,
) -> rusqlite::Result<()> {
    for item in result.warnings.iter().chain(result.context.iter()) {
        db::record_injection_sync(
            conn,
            project_id,
            session_id,
            &item.kind,
            item.source_id,
            item.relevance,
        )?;
    }
    for file in &result.files {
        if let Some(row) = db::get_file_sync(conn, project_id, &file.path)? {
            db::record_injection_sync(conn, project_id, session_id, "file", Some(row.id), 0.5)?;
        }
    }
    Ok(())
}

/// Entry point: compose, allocate, trim, record.
pub fn route_context_sync(
    conn: &Connection,
    project_id: i64,
    intent: Intent,
    request: &ContextRequest,
) -> rusqlite::Result<UnifiedContextResult> {
    let input = CollectorInput {
        files: request.files.clone(),
        query: request.query.clone(),
        task: request.task.clone(),
        session_id: request.session_id,
    };

    let mut result = UnifiedContextResult {
        meta: muninn_types::ContextMeta {
            intent: intent.as_str().to_string(),
            ..Default::default()
        },
        ..Default::default()
    };

    for (name, collector) in collectors_for_intent(intent, &input) {
        if let Err(e) = collector(conn, project_id, &input, &mut result) {
            metrics::count_suppressed(&format!("router.{name}"), &e);
        }
    }

    let allocation = allocate_for_session_sync(conn, project_id, input.session_id)?;
    apply_budget(&mut result, &allocation);

    if let Some(session_id) = input.session_id
        && let Err(e) = record_injections(conn, project_id, session_id, &result)
    {
        metrics::count_suppressed("router.record_injections", &e);
    }

    Ok(result)
}
