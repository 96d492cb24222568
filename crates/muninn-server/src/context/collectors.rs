// crates/muninn-server/src/context/collectors.rs
// Parameterized context collectors.
//
// Each collector is a pure reader: it fetches candidates for one context
// kind and appends them to the UnifiedContextResult, recording its kind in
// meta.sources_queried when it contributed anything. The router decides
// which collectors run for an intent; the budget allocator trims afterward.

use rusqlite::Connection;

use muninn_types::{ContextItem, FileContext, UnifiedContextResult};

use crate::db;

/// Shared collector input, shaped from the client request.
#[derive(Debug, Clone, Default)]
pub struct CollectorInput {
    pub files: Vec<String>,
    pub query: Option<String>,
    pub task: Option<String>,
    pub session_id: Option<i64>,
}

impl CollectorInput {
    /// The text used for free-text matching: explicit query first, task second.
    fn search_text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .or(self.task.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Record a source kind once, preserving first-appearance order.
fn note_source(result: &mut UnifiedContextResult, kind: &str) {
    if !result.meta.sources_queried.iter().any(|s| s == kind) {
        result.meta.sources_queried.push(kind.to_string());
    }
}

/// Per-file info: purpose, fragility, change history. Requested files that
/// the store has never seen still get a stub row so the agent knows the
/// file is unknown.
pub fn collect_file_info(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    if input.files.is_empty() {
        return Ok(());
    }
    for path in &input.files {
        let row = db::get_file_sync(conn, project_id, path)?;
        let file_context = match row {
            Some(file) => {
                let reason = file
                    .fragility_signals
                    .as_deref()
                    .and_then(|json| {
                        serde_json::from_str::<crate::fragility::FragilitySignals>(json).ok()
                    })
                    .map(|signals| signals.explanation());
                FileContext {
                    path: file.path,
                    purpose: file.purpose,
                    fragility: (file.fragility > 0).then_some(file.fragility),
                    fragility_reason: reason,
                    change_count: file.change_count,
                }
            }
            None => FileContext {
                path: path.clone(),
                purpose: None,
                fragility: None,
                fragility_reason: None,
                change_count: 0,
            },
        };
        result.files.push(file_context);
    }
    note_source(result, "files");
    Ok(())
}

/// Recent test results from sessions that touched the input files.
pub fn collect_test_history(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    if input.files.is_empty() {
        return Ok(());
    }
    let sessions = db::recent_sessions_sync(conn, project_id, 20)?;
    let mut appended = 0;
    for session in sessions {
        if !session.files_touched.iter().any(|f| input.files.contains(f)) {
            continue;
        }
        for test in db::session_test_results_sync(conn, session.id)? {
            if test.failed > 0 {
                result.context.push(ContextItem {
                    kind: "test_history".to_string(),
                    source_id: Some(test.id),
                    title: format!("{} failing tests after touching these files", test.failed),
                    body: format!("passed {}, failed {} ({})", test.passed, test.failed, test.status),
                    relevance: 0.7,
                });
                appended += 1;
            }
        }
        if appended >= 5 {
            break;
        }
    }
    if appended > 0 {
        note_source(result, "test_history");
    }
    Ok(())
}

/// Files historically changed together with the input files.
pub fn collect_cochangers(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let mut appended = 0;
    for path in &input.files {
        for (other, count) in db::cochangers_sync(conn, project_id, path, 3)? {
            if count < 2 {
                continue;
            }
            result.context.push(ContextItem {
                kind: "cochange".to_string(),
                source_id: None,
                title: format!("{other} usually changes with {path}"),
                body: format!("changed together in {count} past sessions"),
                relevance: (count as f64 / 10.0).min(1.0),
            });
            appended += 1;
        }
    }
    if appended > 0 {
        note_source(result, "cochangers");
    }
    Ok(())
}

/// Prior decisions that contradict what the query/task is about: matching
/// decisions whose outcome was revised or reverted surface as warnings.
pub fn collect_contradictions(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let Some(text) = input.search_text() else {
        return Ok(());
    };
    let hits = db::search_decisions_sync(conn, project_id, text, 5)?;
    let mut appended = 0;
    for decision in hits {
        if matches!(decision.outcome_status.as_str(), "revised" | "reverted") {
            result.warnings.push(ContextItem {
                kind: "contradiction".to_string(),
                source_id: Some(decision.id),
                title: format!("prior decision was {}: {}", decision.outcome_status, decision.title),
                body: decision.decision,
                relevance: 0.9,
            });
            appended += 1;
        }
    }
    if appended > 0 {
        note_source(result, "contradictions");
    }
    Ok(())
}

/// Decisions that failed outright: attempts the agent should not repeat.
pub fn collect_failed_decisions(
    conn: &Connection,
    project_id: i64,
    _input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let failed = db::failed_decisions_sync(conn, project_id, 3)?;
    let appended = failed.len();
    for decision in failed {
        result.warnings.push(ContextItem {
            kind: "failed_decision".to_string(),
            source_id: Some(decision.id),
            title: format!("previously failed: {}", decision.title),
            body: decision
                .outcome_notes
                .unwrap_or(decision.decision),
            relevance: 0.8,
        });
    }
    if appended > 0 {
        note_source(result, "decisions");
    }
    Ok(())
}

/// Active decisions whose affects list covers the input files.
pub fn collect_file_decisions(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    if input.files.is_empty() {
        return Ok(());
    }
    let decisions = db::decisions_for_files_sync(conn, project_id, &input.files, 5)?;
    let appended = decisions.len();
    for decision in decisions {
        result.context.push(ContextItem {
            kind: "decision".to_string(),
            source_id: Some(decision.id),
            title: decision.title,
            body: format!("{} ({})", decision.decision, decision.reasoning),
            relevance: 0.8,
        });
    }
    if appended > 0 {
        note_source(result, "decisions");
    }
    Ok(())
}

/// Learnings whose context mentions the input files.
pub fn collect_file_learnings(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    if input.files.is_empty() {
        return Ok(());
    }
    let learnings = db::learnings_for_files_sync(conn, project_id, &input.files, 5)?;
    let appended = learnings.len();
    for learning in learnings {
        let relevance = (learning.confidence / db::MAX_CONFIDENCE).min(1.0);
        result.context.push(ContextItem {
            kind: "learning".to_string(),
            source_id: Some(learning.id),
            title: learning.title,
            body: learning.content,
            relevance,
        });
    }
    if appended > 0 {
        note_source(result, "learnings");
    }
    Ok(())
}

/// Open issues mentioning the input files.
pub fn collect_file_issues(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    if input.files.is_empty() {
        return Ok(());
    }
    let issues = db::issues_for_files_sync(conn, project_id, &input.files, 5)?;
    let appended = issues.len();
    for issue in issues {
        result.context.push(issue_item(issue));
    }
    if appended > 0 {
        note_source(result, "issues");
    }
    Ok(())
}

/// Open issues project-wide, most severe first.
pub fn collect_open_issues(
    conn: &Connection,
    project_id: i64,
    _input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let issues = db::open_issues_sync(conn, project_id, 5)?;
    let appended = issues.len();
    for issue in issues {
        result.context.push(issue_item(issue));
    }
    if appended > 0 {
        note_source(result, "issues");
    }
    Ok(())
}

fn issue_item(issue: db::IssueRow) -> ContextItem {
    let mut body = issue.description;
    if let Some(workaround) = issue.workaround {
        body.push_str(&format!(" [workaround: {workaround}]"));
    }
    ContextItem {
        kind: "issue".to_string(),
        source_id: Some(issue.id),
        title: format!("open {} (sev {}): {}", issue.issue_type, issue.severity, issue.title),
        body,
        relevance: issue.severity as f64 / 10.0,
    }
}

/// Free-text search over decisions and learnings.
pub fn collect_query_results(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let Some(text) = input.search_text() else {
        return Ok(());
    };
    let mut appended = 0;
    for decision in db::search_decisions_sync(conn, project_id, text, 3)? {
        result.context.push(ContextItem {
            kind: "search".to_string(),
            source_id: Some(decision.id),
            title: format!("decision: {}", decision.title),
            body: decision.decision,
            relevance: 0.6,
        });
        appended += 1;
    }
    for learning in db::search_learnings_sync(conn, project_id, text, 3)? {
        result.context.push(ContextItem {
            kind: "search".to_string(),
            source_id: Some(learning.id),
            title: format!("learning: {}", learning.title),
            body: learning.content,
            relevance: 0.6,
        });
        appended += 1;
    }
    if appended > 0 {
        note_source(result, "search");
    }
    Ok(())
}

/// Files likely relevant to the task: keyword match on path and purpose,
/// falling back to the most fragile files when nothing matches.
pub fn collect_suggested_files(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let Some(text) = input.search_text() else {
        return Ok(());
    };
    let keywords: Vec<String> = text
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .map(|w| w.to_lowercase())
        .collect();
    if keywords.is_empty() {
        return Ok(());
    }

    let candidates = db::files_for_fragility_scan_sync(conn, project_id, 200)?;
    let mut scored: Vec<(i64, db::FileRow)> = candidates
        .into_iter()
        .filter_map(|file| {
            let haystack = format!(
                "{} {}",
                file.path.to_lowercase(),
                file.purpose.as_deref().unwrap_or("").to_lowercase()
            );
            let hits = keywords.iter().filter(|k| haystack.contains(k.as_str())).count() as i64;
            (hits > 0).then_some((hits, file))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.fragility.cmp(&a.1.fragility)));

    let appended = scored.len().min(5);
    for (_, file) in scored.into_iter().take(5) {
        result.files.push(FileContext {
            path: file.path,
            purpose: file.purpose,
            fragility: (file.fragility > 0).then_some(file.fragility),
            fragility_reason: None,
            change_count: file.change_count,
        });
    }
    if appended > 0 {
        note_source(result, "suggested_files");
    }
    Ok(())
}

/// Known fixes: exact fingerprint match on the query when it looks like an
/// error, otherwise the most-applied fixes.
pub fn collect_error_fixes(
    conn: &Connection,
    project_id: i64,
    input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let mut appended = 0;

    if let Some(text) = input.search_text()
        && let Some(hit) = db::lookup_error_fix_sync(conn, project_id, text)
    {
        result.context.push(ContextItem {
            kind: "error_fix".to_string(),
            source_id: Some(hit.id),
            title: format!("known fix (applied {} times)", hit.use_count),
            body: hit.fix_text,
            relevance: 1.0,
        });
        appended += 1;
    }

    if appended == 0 {
        for fix in db::top_error_fixes_sync(conn, project_id, 3)? {
            result.context.push(ContextItem {
                kind: "error_fix".to_string(),
                source_id: Some(fix.id),
                title: format!("fix applied {} times", fix.use_count),
                body: format!("{} -> {}", fix.error_text, fix.fix_text),
                relevance: 0.5,
            });
            appended += 1;
        }
    }

    if appended > 0 {
        note_source(result, "error_fixes");
    }
    Ok(())
}

/// The most recent error events in the project.
pub fn collect_recent_errors(
    conn: &Connection,
    project_id: i64,
    _input: &CollectorInput,
    result: &mut UnifiedContextResult,
) -> rusqlite::Result<()> {
    let errors = db::recent_errors_sync(conn, project_id, 5)?;
    let appended = errors.len();
    for (error_text, file_path) in errors {
        let title = match file_path {
            Some(path) => format!("recent error in {path}"),
            None => "recent error".to_string(),
        };
        result.context.push(ContextItem {
            kind: "recent_error".to_string(),
            source_id: None,
            title,
            body: error_text,
            relevance: 0.6,
        });
    }
    if appended > 0 {
        note_source(result, "recent_errors");
    }
    Ok(())
}
