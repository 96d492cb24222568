//! Core tool implementations.
//!
//! All verbs are async functions that accept `&impl ToolContext` and return
//! `Result<String, String>` for a uniform boundary: the Ok string is the
//! payload handed back to the client, the Err string a validation or
//! storage failure already rendered for humans.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EnvConfig;
use crate::db::StoreAdapter;
use crate::db::pool::DatabasePool;
use crate::error::MuninnError;
use muninn_types::ProjectContext;

mod knowledge;
mod query;
mod session;

pub use knowledge::{run_decision_add, run_file_add, run_issue, run_learn_add};
pub use query::{run_check, run_enrich, run_predict, run_query, run_suggest};
pub use session::{run_approve, run_passthrough, run_session};

/// Standard error message when no project is active.
pub const NO_ACTIVE_PROJECT_ERROR: &str =
    "No active project. Call session(action=\"start\") from a project directory first.";

/// Common context required by all tools.
#[async_trait]
pub trait ToolContext: Send + Sync {
    /// The store adapter for this process (local pool or remote HTTP).
    fn store(&self) -> &Arc<dyn StoreAdapter>;

    /// Environment configuration.
    fn config(&self) -> &EnvConfig;

    /// The typed query layer needs direct pool access; in http mode this is
    /// Unavailable and verbs that depend on it say so.
    fn pool(&self) -> Result<&Arc<DatabasePool>, MuninnError> {
        self.store().raw()
    }

    /// Optional global store for cross-project learnings.
    fn global_pool(&self) -> Option<&Arc<DatabasePool>> {
        None
    }

    /// Current project context (if any).
    async fn get_project(&self) -> Option<ProjectContext>;

    /// Set current project context.
    async fn set_project(&self, project: ProjectContext);

    /// Current project ID (convenience).
    async fn project_id(&self) -> Option<i64> {
        self.get_project().await.map(|p| p.id)
    }

    /// Current session ID (if any).
    async fn get_session_id(&self) -> Option<i64>;

    /// Set or clear the session ID.
    async fn set_session_id(&self, session_id: Option<i64>);
}

/// Information about an exposed tool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// The bounded verb set.
pub fn list_tools() -> Vec<ToolInfo> {
    vec![
        ToolInfo { name: "query", description: "Search stored decisions and learnings" },
        ToolInfo { name: "check", description: "Risk assessment for a set of files" },
        ToolInfo { name: "file_add", description: "Record file purpose and fragility" },
        ToolInfo { name: "decision_add", description: "Record an architectural decision" },
        ToolInfo { name: "learn_add", description: "Record a learning" },
        ToolInfo { name: "issue", description: "Add or resolve a known issue" },
        ToolInfo { name: "session", description: "Start or end a working session" },
        ToolInfo { name: "predict", description: "Predict files relevant to a task" },
        ToolInfo { name: "suggest", description: "Suggest strategies for a task" },
        ToolInfo { name: "enrich", description: "Context bundle for a tool invocation" },
        ToolInfo { name: "approve", description: "Approve a pending operation" },
        ToolInfo { name: "passthrough", description: "Ship a raw statement to the store" },
    ]
}

/// Dispatch one verb by name.
pub async fn dispatch(
    ctx: &impl ToolContext,
    name: &str,
    args: serde_json::Value,
) -> Result<String, String> {
    match name {
        "query" => run_query(ctx, args).await,
        "check" => run_check(ctx, args).await,
        "file_add" => run_file_add(ctx, args).await,
        "decision_add" => run_decision_add(ctx, args).await,
        "learn_add" => run_learn_add(ctx, args).await,
        "issue" => run_issue(ctx, args).await,
        "session" => run_session(ctx, args).await,
        "predict" => run_predict(ctx, args).await,
        "suggest" => run_suggest(ctx, args).await,
        "enrich" => run_enrich(ctx, args).await,
        "approve" => run_approve(ctx, args).await,
        "passthrough" => run_passthrough(ctx, args).await,
        other => Err(format!("unknown tool: {other}")),
    }
}

/// Resolve the active project or fail with the standard message.
pub(crate) async fn require_project(ctx: &impl ToolContext) -> Result<i64, String> {
    ctx.project_id()
        .await
        .ok_or_else(|| NO_ACTIVE_PROJECT_ERROR.to_string())
}

/// Parse the verb's JSON arguments into a typed request.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(
    args: serde_json::Value,
) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))
}
