// crates/muninn-server/src/learning/traces.rs
// Reasoning-trace extraction: a post-hoc reconstruction of the agent's
// investigation from its tool-call sequence.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::db::{ToolCallRow, TraceRecord};

/// Minimum calls before a trace is worth extracting.
const MIN_CALLS: usize = 3;
const SIGNATURE_CALLS: usize = 5;
const SIGNATURE_CAP: usize = 5;
const DEAD_END_CAP: usize = 5;
const CHAIN_CAP: usize = 5;

/// The fixed, ordered strategy catalog: every pattern that matches the
/// joined tool-name sequence becomes a tag.
static STRATEGY_CATALOG: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let compile = |pattern: &str| Regex::new(pattern).expect("valid catalog regex");
    vec![
        ("read-first", compile(r"^\S*read")),
        ("test-driven", compile(r"test\S* .*edit\S* .*test")),
        ("search-narrow", compile(r"(search|grep|query)\S* .*read")),
        ("edit-verify", compile(r"edit\S* .*(test|check|run)")),
        ("error-driven", compile(r"(debug|error)")),
        ("checkpoint", compile(r"muninn_(file|decision)_add")),
    ]
});

fn normalize_tool_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_read_call(call: &ToolCallRow) -> bool {
    let lower = call.tool_name.to_lowercase();
    (lower.contains("read") || lower.contains("open") || lower.contains("view"))
        && !call.files_involved.is_empty()
}

/// Keyword bag from the first few calls: summary words plus file basenames.
fn problem_signature(calls: &[ToolCallRow]) -> Vec<String> {
    let mut signature = Vec::new();
    for call in calls.iter().take(SIGNATURE_CALLS) {
        for word in call.input_summary.split_whitespace() {
            let cleaned = word.to_lowercase();
            if cleaned.len() > 3
                && cleaned.chars().all(|c| c.is_ascii_alphabetic())
                && !signature.contains(&cleaned)
            {
                signature.push(cleaned);
            }
        }
        for file in &call.files_involved {
            let name = basename(file).to_string();
            if !signature.contains(&name) {
                signature.push(name);
            }
        }
    }
    signature.truncate(SIGNATURE_CAP);
    signature
}

/// A file re-read with at least two intervening calls marks a dead end:
/// whatever happened in between sent the agent back.
fn dead_ends(calls: &[ToolCallRow]) -> Vec<String> {
    let mut last_read: HashMap<&str, usize> = HashMap::new();
    let mut found = Vec::new();

    for (index, call) in calls.iter().enumerate() {
        if !is_read_call(call) {
            continue;
        }
        let Some(file) = call.files_involved.first() else {
            continue;
        };
        if let Some(&previous) = last_read.get(file.as_str())
            && index - previous - 1 >= 2
        {
            let middle: Vec<String> = calls[previous + 1..index]
                .iter()
                .map(|c| normalize_tool_name(&c.tool_name))
                .collect();
            let entry = format!("Backtrack to {} after: {}", basename(file), middle.join(" -> "));
            if !found.contains(&entry) {
                found.push(entry);
            }
        }
        last_read.insert(file.as_str(), index);
    }

    found.truncate(DEAD_END_CAP);
    found
}

/// Where a call "was": the parent directory of its first file, else the
/// normalized tool name.
fn call_domain(call: &ToolCallRow) -> String {
    if let Some(file) = call.files_involved.first() {
        let parent = std::path::Path::new(file)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !parent.is_empty() {
            return parent;
        }
    }
    normalize_tool_name(&call.tool_name)
}

/// Domain transitions: "Shifted from A to B".
fn hypothesis_chain(calls: &[ToolCallRow]) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current: Option<String> = None;
    for call in calls {
        let domain = call_domain(call);
        if let Some(ref previous) = current
            && *previous != domain
        {
            chain.push(format!("Shifted from {previous} to {domain}"));
            if chain.len() >= CHAIN_CAP {
                break;
            }
        }
        current = Some(domain);
    }
    chain
}

/// The last memory-checkpoint call and the two calls before it, rendered as
/// "a -> b -> c (files)". Only meaningful for sessions that didn't fail.
fn breakthrough(calls: &[ToolCallRow], outcome: Option<&str>) -> Option<String> {
    if outcome == Some("failed") {
        return None;
    }
    let checkpoint = calls.iter().rposition(|call| {
        matches!(
            normalize_tool_name(&call.tool_name).as_str(),
            "muninn_file_add" | "muninn_decision_add"
        )
    })?;

    let start = checkpoint.saturating_sub(2);
    let window = &calls[start..=checkpoint];
    let sequence: Vec<String> = window
        .iter()
        .map(|c| normalize_tool_name(&c.tool_name))
        .collect();

    let mut files = Vec::new();
    for call in window {
        for file in &call.files_involved {
            let name = basename(file).to_string();
            if !files.contains(&name) {
                files.push(name);
            }
        }
    }

    Some(format!("{} ({})", sequence.join(" -> "), files.join(", ")))
}

/// Every catalog pattern matching the joined tool sequence becomes a tag.
fn strategy_tags(calls: &[ToolCallRow]) -> Vec<String> {
    let sequence: String = calls
        .iter()
        .map(|c| normalize_tool_name(&c.tool_name))
        .collect::<Vec<_>>()
        .join(" ");
    STRATEGY_CATALOG
        .iter()
        .filter(|(_, pattern)| pattern.is_match(&sequence))
        .map(|(tag, _)| tag.to_string())
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn duration_ms(calls: &[ToolCallRow]) -> i64 {
    let (Some(first), Some(last)) = (calls.first(), calls.last()) else {
        return 0;
    };
    match (parse_timestamp(&first.created_at), parse_timestamp(&last.created_at)) {
        (Some(start), Some(end)) => (end - start).num_milliseconds().max(0),
        _ => 0,
    }
}

/// Extract a trace from a session's tool calls. None below the minimum.
pub fn extract_trace(calls: &[ToolCallRow], outcome: Option<&str>) -> Option<TraceRecord> {
    if calls.len() < MIN_CALLS {
        return None;
    }
    Some(TraceRecord {
        problem_signature: problem_signature(calls),
        dead_ends: dead_ends(calls),
        hypothesis_chain: hypothesis_chain(calls),
        breakthrough: breakthrough(calls, outcome),
        strategy_tags: strategy_tags(calls),
        duration_ms: duration_ms(calls),
    })
}
