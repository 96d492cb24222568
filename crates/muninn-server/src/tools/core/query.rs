// crates/muninn-server/src/tools/core/query.rs
// Read verbs: query, check, predict, suggest, enrich.

use serde::Deserialize;

use super::{ToolContext, parse_args, require_project};
use crate::context::{CollectorInput, collectors, route_context_sync};
use crate::db;
use crate::learning::match_strategies_sync;
use crate::validation::{self, MAX_CONTENT_LEN, MAX_TEXT_LEN};
use muninn_types::{ContextRequest, Intent, UnifiedContextResult};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default)]
    pub smart: bool,
    #[serde(default)]
    pub vector: bool,
    #[serde(default)]
    pub fts: bool,
    /// Caller-supplied embedding for the vector index (providers live
    /// outside the core).
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

pub async fn run_query(ctx: &impl ToolContext, args: serde_json::Value) -> Result<String, String> {
    let request: QueryRequest = parse_args(args)?;
    validation::validate_text("query.text", &request.text, MAX_TEXT_LEN)
        .map_err(|e| e.to_string())?;

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    let use_vector = request.vector && request.embedding.is_some();
    if request.vector && request.embedding.is_none() {
        tracing::debug!("vector search requested without embedding; using FTS");
    }
    let _ = (request.smart, request.fts);

    let text = request.text.clone();
    let embedding = request.embedding.clone();
    let (decisions, learnings, vector_hits) = pool
        .run(move |conn| {
            let decisions = db::search_decisions_sync(conn, project_id, &text, 5)?;
            let learnings = db::search_learnings_sync(conn, project_id, &text, 5)?;
            let vector_hits = match embedding.as_deref().filter(|_| use_vector) {
                Some(embedding) => db::vector_search_sync(conn, embedding, 5)?,
                None => Vec::new(),
            };
            Ok::<_, rusqlite::Error>((decisions, learnings, vector_hits))
        })
        .await
        .map_err(|e| e.to_string())?;

    let payload = serde_json::json!({
        "decisions": decisions.iter().map(|d| serde_json::json!({
            "id": d.id,
            "title": d.title,
            "decision": d.decision,
            "outcome_status": d.outcome_status,
        })).collect::<Vec<_>>(),
        "learnings": learnings.iter().map(|l| serde_json::json!({
            "id": l.id,
            "title": l.title,
            "content": l.content,
            "confidence": l.confidence,
        })).collect::<Vec<_>>(),
        "semantic": vector_hits.iter().map(|hit| serde_json::json!({
            "kind": hit.source_kind,
            "id": hit.source_id,
            "content": hit.content,
            "score": hit.score,
        })).collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&payload).map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub files: Vec<String>,
}

pub async fn run_check(ctx: &impl ToolContext, args: serde_json::Value) -> Result<String, String> {
    let request: CheckRequest = parse_args(args)?;
    if request.files.is_empty() {
        return Err("check.files: must name at least one file".to_string());
    }
    for path in &request.files {
        validation::validate_path("check.files", path).map_err(|e| e.to_string())?;
    }

    let project_id = require_project(ctx).await?;
    let session_id = ctx.get_session_id().await;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    let context_request = ContextRequest {
        files: request.files,
        session_id,
        ..Default::default()
    };
    let result = pool
        .run(move |conn| route_context_sync(conn, project_id, Intent::Edit, &context_request))
        .await
        .map_err(|e| e.to_string())?;

    render_bundle(&result)
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub advise: bool,
}

pub async fn run_predict(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: PredictRequest = parse_args(args)?;
    if let Some(ref task) = request.task {
        validation::validate_text("predict.task", task, MAX_CONTENT_LEN)
            .map_err(|e| e.to_string())?;
    }
    for path in &request.files {
        validation::validate_path("predict.files", path).map_err(|e| e.to_string())?;
    }

    let project_id = require_project(ctx).await?;
    let session_id = ctx.get_session_id().await;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    let advise = request.advise;
    let result = pool
        .run(move |conn| {
            let input = CollectorInput {
                files: request.files.clone(),
                task: request.task.clone(),
                session_id,
                ..Default::default()
            };
            let mut result = UnifiedContextResult::default();
            collectors::collect_suggested_files(conn, project_id, &input, &mut result)?;
            // Seed files pull in their historical co-changers too.
            collectors::collect_cochangers(conn, project_id, &input, &mut result)?;

            // Suggestions are logged so retrieval calibration can score them.
            if let Some(session_id) = session_id
                && !result.files.is_empty()
            {
                let suggested: Vec<String> =
                    result.files.iter().map(|f| f.path.clone()).collect();
                db::log_tool_call_sync(
                    conn,
                    project_id,
                    session_id,
                    "predict",
                    input.task.as_deref().unwrap_or(""),
                    &suggested.join(","),
                    true,
                )?;
            }
            Ok::<_, rusqlite::Error>(result)
        })
        .await
        .map_err(|e| e.to_string())?;

    let mut payload = serde_json::json!({
        "files": result.files,
        "cochangers": result.context,
    });
    if advise {
        payload["advice"] = serde_json::json!(
            result
                .files
                .iter()
                .filter(|f| f.fragility.unwrap_or(0) >= 7)
                .map(|f| format!("{} is fragile; read before editing", f.path))
                .collect::<Vec<_>>()
        );
    }
    serde_json::to_string_pretty(&payload).map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct SuggestRequest {
    pub task: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, rename = "includeSymbols")]
    pub include_symbols: bool,
}

pub async fn run_suggest(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: SuggestRequest = parse_args(args)?;
    validation::validate_text("suggest.task", &request.task, MAX_CONTENT_LEN)
        .map_err(|e| e.to_string())?;

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;
    let limit = request.limit.unwrap_or(3).clamp(1, 10);
    let _ = request.include_symbols;

    let task = request.task.clone();
    let strategies = pool
        .run(move |conn| match_strategies_sync(conn, project_id, &task, limit))
        .await
        .map_err(|e| e.to_string())?;

    let payload = serde_json::json!({
        "strategies": strategies.iter().map(|s| serde_json::json!({
            "name": s.name,
            "description": s.description,
            "success_rate": s.success_rate,
            "times_used": s.times_used,
            "avg_duration_ms": s.avg_duration_ms,
        })).collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&payload).map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct EnrichRequest {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Map the tool about to run onto a routing intent.
fn intent_for_tool(tool: &str) -> Intent {
    let lower = tool.to_lowercase();
    if lower.contains("edit") || lower.contains("write") || lower.contains("patch") {
        Intent::Edit
    } else if lower.contains("debug") || lower.contains("test") || lower.contains("error") {
        Intent::Debug
    } else if lower.contains("read") || lower.contains("open") {
        Intent::Read
    } else if lower.contains("plan") {
        Intent::Plan
    } else {
        Intent::Explore
    }
}

pub async fn run_enrich(ctx: &impl ToolContext, args: serde_json::Value) -> Result<String, String> {
    let request: EnrichRequest = parse_args(args)?;
    validation::validate_text("enrich.tool", &request.tool, MAX_TEXT_LEN)
        .map_err(|e| e.to_string())?;

    let project_id = require_project(ctx).await?;
    let session_id = ctx.get_session_id().await;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    let intent = intent_for_tool(&request.tool);
    let files: Vec<String> = request
        .input
        .get("files")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    let query = request
        .input
        .get("query")
        .and_then(|v| v.as_str())
        .map(String::from);
    for path in &files {
        validation::validate_path("enrich.input.files", path).map_err(|e| e.to_string())?;
    }

    let context_request = ContextRequest {
        files,
        query,
        session_id,
        ..Default::default()
    };
    let result = pool
        .run(move |conn| route_context_sync(conn, project_id, intent, &context_request))
        .await
        .map_err(|e| e.to_string())?;

    render_bundle(&result)
}

/// Serialize a context bundle for the client.
fn render_bundle(result: &UnifiedContextResult) -> Result<String, String> {
    serde_json::to_string_pretty(result).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::test_context::TestContext;
    use super::*;

    #[tokio::test]
    async fn test_query_returns_matches() {
        let ctx = TestContext::with_project().await;
        let project_id = ctx.project_id().await.unwrap();
        ctx.test_pool()
            .interact(move |conn| {
                db::add_decision_sync(conn, project_id, "storage engine", "use sqlite", "", &[])
                    .map_err(Into::into)
            })
            .await
            .unwrap();

        let reply = run_query(&ctx, serde_json::json!({"text": "sqlite"}))
            .await
            .unwrap();
        assert!(reply.contains("storage engine"));
    }

    #[tokio::test]
    async fn test_query_rejects_hostile_text() {
        let ctx = TestContext::with_project().await;
        let err = run_query(&ctx, serde_json::json!({"text": "x; drop table"}))
            .await
            .unwrap_err();
        assert!(err.contains("query.text"));
    }

    #[tokio::test]
    async fn test_check_reports_fragility() {
        let ctx = TestContext::with_project().await;
        let project_id = ctx.project_id().await.unwrap();
        ctx.test_pool()
            .interact(move |conn| {
                db::upsert_file_sync(conn, project_id, "src/core.rs", Some("hot path"), Some(9))
                    .map_err(Into::into)
            })
            .await
            .unwrap();

        let reply = run_check(&ctx, serde_json::json!({"files": ["src/core.rs"]}))
            .await
            .unwrap();
        assert!(reply.contains("src/core.rs"));
        assert!(reply.contains("\"fragility\": 9"));
    }

    #[tokio::test]
    async fn test_predict_logs_suggestions_for_calibration() {
        let ctx = TestContext::with_project().await;
        let project_id = ctx.project_id().await.unwrap();
        ctx.test_pool()
            .interact(move |conn| {
                db::upsert_file_sync(conn, project_id, "src/parser.rs", Some("token parser"), None)
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        let session_id = ctx
            .test_pool()
            .interact(move |conn| db::start_session_sync(conn, project_id, None).map_err(Into::into))
            .await
            .unwrap();
        ctx.set_session_id(Some(session_id)).await;

        let reply = run_predict(
            &ctx,
            serde_json::json!({"task": "fix the parser diagnostics"}),
        )
        .await
        .unwrap();
        assert!(reply.contains("src/parser.rs"));

        let calls = ctx
            .test_pool()
            .interact(move |conn| db::session_tool_calls_sync(conn, session_id).map_err(Into::into))
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "predict");
        assert_eq!(calls[0].files_involved, vec!["src/parser.rs"]);
    }

    #[tokio::test]
    async fn test_suggest_returns_ranked_strategies() {
        let ctx = TestContext::with_project().await;
        let project_id = ctx.project_id().await.unwrap();
        ctx.test_pool()
            .interact(move |conn| {
                db::upsert_strategy_sync(
                    conn,
                    project_id,
                    db::UpsertStrategyParams {
                        name: "edit-verify",
                        description: "verify after editing",
                        success_rate: 0.8,
                        times_used: 4,
                        avg_duration_ms: 30_000,
                        source_trace_ids: &[],
                    },
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();

        let reply = run_suggest(&ctx, serde_json::json!({"task": "verify the editor"}))
            .await
            .unwrap();
        assert!(reply.contains("edit-verify"));
    }

    #[tokio::test]
    async fn test_enrich_maps_tool_to_intent() {
        assert_eq!(intent_for_tool("edit_file"), Intent::Edit);
        assert_eq!(intent_for_tool("run_tests"), Intent::Debug);
        assert_eq!(intent_for_tool("read_file"), Intent::Read);
        assert_eq!(intent_for_tool("browse"), Intent::Explore);

        let ctx = TestContext::with_project().await;
        let reply = run_enrich(
            &ctx,
            serde_json::json!({"tool": "edit_file", "input": {"files": ["src/a.rs"]}}),
        )
        .await
        .unwrap();
        assert!(reply.contains("\"intent\": \"edit\""));
    }
}
