// crates/muninn-server/src/db/mod.rs
// Store layer: pooled embedded database, schema migrations, integrity gate,
// FTS mirrors, and the local/remote adapter seam.

pub mod adapter;
mod decisions;
mod errors;
mod experiments;
mod files;
mod graph;
mod injection;
mod integrity;
mod issues;
mod learnings;
mod migration_helpers;
pub mod migration_log;
pub mod pool;
mod project;
mod relationships;
pub mod remote;
mod schema;
mod search;
mod sessions;
mod strategies;
#[cfg(test)]
pub mod test_support;
mod types;

pub use adapter::{LocalStore, RunResult, SqlRow, SqlValue, StoreAdapter, open_store};
pub use decisions::{
    add_decision_sync, archive_decision_sync, decisions_for_files_sync, failed_decisions_sync,
    get_decision_sync, set_decision_outcome_sync,
};
pub use errors::{
    error_count_for_file_sync, error_fingerprint, lookup_error_fix_sync, recent_errors_sync,
    record_error_event_sync, store_error_fix_sync, top_error_fixes_sync,
};
pub use experiments::{
    budget_recommendations_sync, conclude_ab_test_sync, record_arm_observation_sync,
    running_ab_test_sync, start_ab_test_sync, upsert_budget_recommendation_sync,
};
pub use files::{
    archive_file_sync, files_for_fragility_scan_sync, get_file_sync, record_file_change_sync,
    replace_symbols_sync, store_fragility_sync, symbol_counts_sync, upsert_file_sync,
    weekly_change_rate_sync,
};
pub use graph::{
    cochangers_sync, dependent_count_sync, has_tests_sync, map_test_to_source_sync,
    replace_call_edges_sync,
};
pub use injection::{
    InjectionKindStats, injection_stats_by_kind_sync, mark_injection_used_sync,
    record_injection_sync, record_retrieval_feedback_sync, retrieval_accuracy_by_kind_sync,
    session_injections_sync,
};
pub use integrity::IntegrityReport;
pub use issues::{
    add_issue_sync, get_issue_sync, issues_for_files_sync, open_issues_sync, resolve_issue_sync,
};
pub use learnings::{
    AddLearningParams, MAX_CONFIDENCE, MIN_CONFIDENCE, add_learning_sync, get_learning_sync,
    learnings_for_files_sync, stale_learning_ids_sync, top_learnings_sync,
    update_confidence_sync,
};
pub use project::{ensure_project_sync, get_project_by_path_sync};
pub use relationships::{AddRelationshipParams, add_relationship_sync, relationships_from_sync};
pub use schema::{LATEST_SCHEMA_VERSION, rebuild_fts, run_all_migrations};
pub use search::{
    VectorHit, distance_to_score, embedding_to_bytes, escape_fts_query, search_decisions_sync,
    search_learnings_sync, store_context_embedding_sync, vector_search_sync,
};
pub use sessions::{
    SessionSignals, end_session_sync, get_session_sync, log_tool_call_sync, recent_sessions_sync,
    record_commit_sync, record_revert_sync, record_test_result_sync, session_files_touched_sync,
    session_signals_sync, session_test_results_sync, session_tool_calls_sync,
    sessions_needing_learning_sync, start_session_sync,
};
pub use strategies::{
    UpsertStrategyParams, get_strategy_by_name_sync, recent_traces_sync, store_trace_sync,
    top_strategies_sync, upsert_strategy_sync,
};
pub use types::*;
