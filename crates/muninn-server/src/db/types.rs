// crates/muninn-server/src/db/types.rs
// Typed row records for store queries.
//
// Every internal query parses into one of these; dynamic rows exist only at
// the remote-adapter seam. JSON-at-rest columns (affects, files_touched,
// previous_paths, strategy trace data) get explicit record types or plain
// Vec<String>, never untyped maps.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct ProjectRow {
    pub id: i64,
    pub path: String,
    pub name: Option<String>,
    /// Paths this project previously lived at (rename history), newest last.
    pub previous_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub project_id: i64,
    pub path: String,
    pub purpose: Option<String>,
    pub fragility: i64,
    pub fragility_signals: Option<String>,
    pub fragility_computed_at: Option<String>,
    pub change_count: i64,
    pub velocity_score: f64,
    pub temperature: Option<String>,
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub id: i64,
    pub title: String,
    pub decision: String,
    pub reasoning: String,
    pub affects: Vec<String>,
    pub status: String,
    pub outcome_status: String,
    pub outcome_notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct IssueRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub issue_type: String,
    pub severity: i64,
    pub status: String,
    pub workaround: Option<String>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LearningRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub category: String,
    pub context: String,
    pub confidence: f64,
    pub times_applied: i64,
    pub foundational: bool,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub project_id: i64,
    pub goal: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub outcome: Option<String>,
    /// 0=failed, 1=partial, 2=success; None while the session runs.
    pub success: Option<i64>,
    pub files_touched: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ToolCallRow {
    pub id: i64,
    pub session_id: i64,
    pub tool_name: String,
    pub input_summary: String,
    /// Comma-separated on disk; split on read.
    pub files_involved: Vec<String>,
    pub success: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct TestResultRow {
    pub id: i64,
    pub session_id: i64,
    pub status: String,
    pub passed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone)]
pub struct InjectionRow {
    pub id: i64,
    pub session_id: i64,
    pub context_type: String,
    pub source_id: Option<i64>,
    pub was_used: bool,
    pub relevance_score: f64,
}

#[derive(Debug, Clone)]
pub struct ErrorFixRow {
    pub id: i64,
    pub error_text: String,
    pub error_fingerprint: String,
    pub fix_text: String,
    pub use_count: i64,
}

/// The JSON artefact stored per reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub problem_signature: Vec<String>,
    pub dead_ends: Vec<String>,
    pub hypothesis_chain: Vec<String>,
    pub breakthrough: Option<String>,
    pub strategy_tags: Vec<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct TraceRow {
    pub id: i64,
    pub session_id: i64,
    pub record: TraceRecord,
    pub outcome: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StrategyRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub success_rate: f64,
    pub times_used: i64,
    pub avg_duration_ms: i64,
    pub source_trace_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct AbTestRow {
    pub id: i64,
    pub project_id: i64,
    pub test_name: String,
    pub control_config: BudgetConfig,
    pub variant_config: BudgetConfig,
    pub metric: String,
    pub min_sessions: i64,
    pub control_sessions: i64,
    pub variant_sessions: i64,
    pub control_metric_sum: f64,
    pub variant_metric_sum: f64,
    pub status: String,
    pub conclusion: Option<String>,
}

/// A per-category budget configuration, as serialized into the control and
/// variant columns of an A/B test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub budgets: std::collections::BTreeMap<String, i64>,
}

#[derive(Debug, Clone)]
pub struct BudgetRecommendationRow {
    pub context_type: String,
    pub recommended_budget: i64,
    pub use_rate: f64,
}

/// Parse a comma-separated file list as stored in tool_calls.files_involved.
pub fn split_files_involved(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse a JSON string-array column, tolerating NULL/malformed data.
pub fn parse_string_array(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_files_involved() {
        assert_eq!(
            split_files_involved("a.rs, b.rs ,,c.rs"),
            vec!["a.rs", "b.rs", "c.rs"]
        );
        assert!(split_files_involved("").is_empty());
    }

    #[test]
    fn test_parse_string_array_tolerates_bad_data() {
        assert_eq!(
            parse_string_array(Some("[\"x\",\"y\"]".into())),
            vec!["x", "y"]
        );
        assert!(parse_string_array(Some("not json".into())).is_empty());
        assert!(parse_string_array(None).is_empty());
    }

    #[test]
    fn test_budget_config_roundtrip() {
        let mut config = BudgetConfig::default();
        config.budgets.insert("decisions".into(), 400);
        let json = serde_json::to_string(&config).unwrap();
        let back: BudgetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_trace_record_roundtrip() {
        let record = TraceRecord {
            problem_signature: vec!["parser".into()],
            dead_ends: vec![],
            hypothesis_chain: vec!["Shifted from src to tests".into()],
            breakthrough: None,
            strategy_tags: vec!["test-first".into()],
            duration_ms: 1200,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.problem_signature, vec!["parser"]);
        assert_eq!(back.duration_ms, 1200);
    }
}
