// crates/muninn-types/src/lib.rs

//! Shared data contracts between the Muninn engine and its clients.
//!
//! This crate defines the wire shapes that cross the tool-protocol boundary:
//! - **Project context**: mapping filesystem paths to database entities
//! - **Intents**: what the agent is about to do (drives context routing)
//! - **Unified context result**: the bounded bundle returned to the agent
//!
//! No native-only dependencies are allowed here; everything must serialize
//! cleanly with serde alone.

use serde::{Deserialize, Serialize};

/// The connection between a local filesystem path and a Muninn database entity.
///
/// Required for almost every operation; it scopes all reads and writes to the
/// correct project store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Persistent database ID for this project. Use for all foreign keys.
    pub id: i64,
    /// Absolute filesystem path to the project root.
    pub path: String,
    /// Human-readable display name (directory name or manifest-derived).
    pub name: Option<String>,
}

/// What the agent is about to do. Each intent selects a different collector
/// composition in the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Edit,
    Read,
    Debug,
    Explore,
    Plan,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Edit => "edit",
            Intent::Read => "read",
            Intent::Debug => "debug",
            Intent::Explore => "explore",
            Intent::Plan => "plan",
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(Intent::Edit),
            "read" => Ok(Intent::Read),
            "debug" => Ok(Intent::Debug),
            "explore" => Ok(Intent::Explore),
            "plan" => Ok(Intent::Plan),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}

/// A context request as received from the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub session_id: Option<i64>,
}

/// One piece of surfaced knowledge inside a context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    /// Category of the item: "decision", "learning", "issue", "error_fix",
    /// "strategy", "cochange", "test_history", "search".
    pub kind: String,
    /// Database id of the backing row, when one exists.
    #[serde(default)]
    pub source_id: Option<i64>,
    /// Short display title.
    pub title: String,
    /// The distilled content to inject.
    pub body: String,
    /// Relevance in [0, 1] as estimated by the collector.
    #[serde(default)]
    pub relevance: f64,
}

/// Per-file context attached to a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContext {
    pub path: String,
    #[serde(default)]
    pub purpose: Option<String>,
    /// Engineered risk estimate, 1-10.
    #[serde(default)]
    pub fragility: Option<i64>,
    #[serde(default)]
    pub fragility_reason: Option<String>,
    #[serde(default)]
    pub change_count: i64,
}

/// Provenance and accounting for a routed bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMeta {
    pub intent: String,
    pub tokens_used: i64,
    /// Collector names in the order they were consulted.
    pub sources_queried: Vec<String>,
    /// Trajectory pattern attached by the allocator, when confident enough.
    #[serde(default)]
    pub trajectory: Option<String>,
    /// Ids of items the allocator considers stale.
    #[serde(default)]
    pub stale_item_ids: Vec<i64>,
}

/// The bounded context bundle returned to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedContextResult {
    /// High-priority warnings (contradictions, critical fragility, failed
    /// prior attempts). Always surfaced first.
    pub warnings: Vec<ContextItem>,
    /// The main context body.
    pub context: Vec<ContextItem>,
    /// File-level context for the files in the request.
    pub files: Vec<FileContext>,
    pub meta: ContextMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_context_roundtrip() {
        let ctx = ProjectContext {
            id: 7,
            path: "/home/user/project".to_string(),
            name: Some("project".to_string()),
        };
        let json = serde_json::to_string(&ctx).unwrap();
        let back: ProjectContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.path, "/home/user/project");
    }

    #[test]
    fn test_intent_serde_lowercase() {
        let json = serde_json::to_string(&Intent::Edit).unwrap();
        assert_eq!(json, "\"edit\"");
        let back: Intent = serde_json::from_str("\"plan\"").unwrap();
        assert_eq!(back, Intent::Plan);
    }

    #[test]
    fn test_intent_from_str_rejects_unknown() {
        assert!("refactor".parse::<Intent>().is_err());
        assert_eq!("debug".parse::<Intent>().unwrap(), Intent::Debug);
    }

    #[test]
    fn test_context_request_defaults() {
        let req: ContextRequest = serde_json::from_str("{}").unwrap();
        assert!(req.query.is_none());
        assert!(req.files.is_empty());
    }

    #[test]
    fn test_unified_result_default_is_empty() {
        let result = UnifiedContextResult::default();
        assert!(result.warnings.is_empty());
        assert!(result.context.is_empty());
        assert_eq!(result.meta.tokens_used, 0);
    }
}
