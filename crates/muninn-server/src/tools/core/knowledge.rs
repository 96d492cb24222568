// crates/muninn-server/src/tools/core/knowledge.rs
// Write verbs: file_add, decision_add, learn_add, issue.

use serde::Deserialize;

use super::{ToolContext, parse_args, require_project};
use crate::db;
use crate::validation::{
    self, IssueRequest, LearningCategory, MAX_CONTENT_LEN, MAX_TEXT_LEN,
};

#[derive(Debug, Deserialize)]
pub struct FileAddRequest {
    pub path: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub fragility: Option<i64>,
    #[serde(default)]
    pub fragility_reason: Option<String>,
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
}

pub async fn run_file_add(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: FileAddRequest = parse_args(args)?;
    validation::validate_path("file.path", &request.path).map_err(|e| e.to_string())?;
    if let Some(ref purpose) = request.purpose {
        validation::validate_text("file.purpose", purpose, MAX_TEXT_LEN)
            .map_err(|e| e.to_string())?;
    }
    if let Some(ref reason) = request.fragility_reason {
        validation::validate_text("file.fragility_reason", reason, MAX_TEXT_LEN)
            .map_err(|e| e.to_string())?;
    }
    if let Some(ref file_type) = request.file_type {
        validation::validate_text("file.type", file_type, MAX_TEXT_LEN)
            .map_err(|e| e.to_string())?;
    }
    if let Some(fragility) = request.fragility
        && !(1..=10).contains(&fragility)
    {
        return Err("file.fragility: must be between 1 and 10".to_string());
    }

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    // The type tag only adds signal when the purpose itself is missing.
    let purpose = request.purpose.or_else(|| {
        request
            .file_type
            .as_ref()
            .map(|t| format!("{t} file"))
    });
    let path = request.path.clone();
    let reason = request.fragility_reason.clone();
    let fragility = request.fragility;

    let file_id = pool
        .run(move |conn| {
            let file_id =
                db::upsert_file_sync(conn, project_id, &path, purpose.as_deref(), fragility)?;
            if let (Some(fragility), Some(reason)) = (fragility, reason.as_ref()) {
                let note = serde_json::json!({ "manual": fragility, "reason": reason });
                conn.execute(
                    "UPDATE files SET fragility_signals = ?1 WHERE id = ?2
                       AND fragility_computed_at IS NULL",
                    rusqlite::params![note.to_string(), file_id],
                )?;
            }
            Ok::<_, rusqlite::Error>(file_id)
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(format!("recorded file #{file_id}: {}", request.path))
}

#[derive(Debug, Deserialize)]
pub struct DecisionAddRequest {
    pub title: String,
    pub decision: String,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub affects: Vec<String>,
}

pub async fn run_decision_add(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: DecisionAddRequest = parse_args(args)?;
    validation::validate_text("decision.title", &request.title, MAX_TEXT_LEN)
        .map_err(|e| e.to_string())?;
    validation::validate_text("decision.decision", &request.decision, MAX_CONTENT_LEN)
        .map_err(|e| e.to_string())?;
    if let Some(ref reasoning) = request.reasoning {
        validation::validate_text("decision.reasoning", reasoning, MAX_CONTENT_LEN)
            .map_err(|e| e.to_string())?;
    }
    for path in &request.affects {
        validation::validate_path("decision.affects", path).map_err(|e| e.to_string())?;
    }

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    let title = request.title.clone();
    let id = pool
        .run_with_retry(move |conn| {
            db::add_decision_sync(
                conn,
                project_id,
                &request.title,
                &request.decision,
                request.reasoning.as_deref().unwrap_or(""),
                &request.affects,
            )
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(format!("recorded decision #{id}: {title}"))
}

#[derive(Debug, Deserialize)]
pub struct LearnAddRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub foundational: bool,
    #[serde(default, rename = "reviewAfter")]
    pub review_after: Option<String>,
}

pub async fn run_learn_add(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: LearnAddRequest = parse_args(args)?;
    validation::validate_text("learning.title", &request.title, MAX_TEXT_LEN)
        .map_err(|e| e.to_string())?;
    validation::validate_text("learning.content", &request.content, MAX_CONTENT_LEN)
        .map_err(|e| e.to_string())?;
    let category = match request.category.as_deref() {
        Some(raw) => validation::parse_enum::<LearningCategory>(
            "learning.category",
            raw,
            "pattern, gotcha, preference, convention, architecture",
        )
        .map_err(|e| e.to_string())?,
        None => LearningCategory::Pattern,
    };
    if let Some(ref context) = request.context {
        validation::validate_text("learning.context", context, MAX_CONTENT_LEN)
            .map_err(|e| e.to_string())?;
    }
    for path in &request.files {
        validation::validate_path("learning.files", path).map_err(|e| e.to_string())?;
    }

    let project_id = require_project(ctx).await?;

    // Global learnings land in the global store when one is wired up.
    let pool = if request.global {
        match ctx.global_pool() {
            Some(global) => global,
            None => {
                tracing::debug!("no global store configured; storing learning project-local");
                ctx.pool().map_err(|e| e.to_string())?
            }
        }
    } else {
        ctx.pool().map_err(|e| e.to_string())?
    };

    let title = request.title.clone();
    // File scope is folded into the context so file-scoped collectors find it.
    let mut context = request.context.unwrap_or_default();
    if !request.files.is_empty() {
        if !context.is_empty() {
            context.push(' ');
        }
        context.push_str(&format!("applies to {}", request.files.join(", ")));
    }

    let id = pool
        .run_with_retry(move |conn| {
            db::add_learning_sync(
                conn,
                project_id,
                db::AddLearningParams {
                    title: &request.title,
                    content: &request.content,
                    category: category.as_ref(),
                    context: &context,
                    confidence: 1.0,
                    foundational: request.foundational,
                    review_after: request.review_after.as_deref(),
                },
            )
        })
        .await
        .map_err(|e| e.to_string())?;

    Ok(format!("recorded learning #{id}: {title}"))
}

pub async fn run_issue(ctx: &impl ToolContext, args: serde_json::Value) -> Result<String, String> {
    let request: IssueRequest = parse_args(args)?;
    request.validate().map_err(|e| e.to_string())?;

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    match request {
        IssueRequest::Add {
            title,
            description,
            issue_type,
            severity,
            workaround,
        } => {
            let display_title = title.clone();
            let id = pool
                .run_with_retry(move |conn| {
                    db::add_issue_sync(
                        conn,
                        project_id,
                        &title,
                        &description,
                        issue_type.as_deref().unwrap_or("bug"),
                        severity.unwrap_or(5),
                        workaround.as_deref(),
                    )
                })
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("recorded issue #{id}: {display_title}"))
        }
        IssueRequest::Resolve { id, resolution } => {
            let resolved = pool
                .run(move |conn| db::resolve_issue_sync(conn, id, &resolution))
                .await
                .map_err(|e| e.to_string())?;
            if resolved {
                Ok(format!("resolved issue #{id}"))
            } else {
                Err(format!("not found: no open issue #{id}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_context::TestContext;
    use super::*;

    #[tokio::test]
    async fn test_file_add_roundtrip() {
        let ctx = TestContext::with_project().await;
        let reply = run_file_add(
            &ctx,
            serde_json::json!({
                "path": "src/io.rs",
                "purpose": "io layer",
                "fragility": 7,
                "fragility_reason": "many callers, no tests",
            }),
        )
        .await
        .unwrap();
        assert!(reply.contains("src/io.rs"));

        let project_id = ctx.project_id().await.unwrap();
        let file = ctx
            .test_pool()
            .interact(move |conn| db::get_file_sync(conn, project_id, "src/io.rs").map_err(Into::into))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.fragility, 7);
        assert!(file.fragility_signals.unwrap().contains("many callers"));
    }

    #[tokio::test]
    async fn test_file_add_rejects_hostile_path() {
        let ctx = TestContext::with_project().await;
        let err = run_file_add(&ctx, serde_json::json!({"path": "src/%2e%2e/etc"}))
            .await
            .unwrap_err();
        assert!(err.contains("file.path"));

        let err = run_file_add(&ctx, serde_json::json!({"path": "a.rs", "fragility": 11}))
            .await
            .unwrap_err();
        assert!(err.contains("fragility"));
    }

    #[tokio::test]
    async fn test_decision_add_requires_project() {
        let ctx = TestContext::new().await;
        let err = run_decision_add(
            &ctx,
            serde_json::json!({"title": "t", "decision": "d"}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("No active project"));
    }

    #[tokio::test]
    async fn test_learn_add_folds_files_into_context() {
        let ctx = TestContext::with_project().await;
        run_learn_add(
            &ctx,
            serde_json::json!({
                "title": "parser gotcha",
                "content": "tokens own their spans",
                "category": "gotcha",
                "files": ["src/parser.rs"],
            }),
        )
        .await
        .unwrap();

        let project_id = ctx.project_id().await.unwrap();
        let hits = ctx
            .test_pool()
            .interact(move |conn| {
                db::learnings_for_files_sync(conn, project_id, &["src/parser.rs".to_string()], 5)
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].category, "gotcha");
    }

    #[tokio::test]
    async fn test_learn_add_rejects_bad_category() {
        let ctx = TestContext::with_project().await;
        let err = run_learn_add(
            &ctx,
            serde_json::json!({"title": "t", "content": "c", "category": "wisdom"}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("learning.category"));
    }

    #[tokio::test]
    async fn test_issue_add_and_resolve() {
        let ctx = TestContext::with_project().await;
        let reply = run_issue(
            &ctx,
            serde_json::json!({"action": "add", "title": "flaky clock", "severity": 6}),
        )
        .await
        .unwrap();
        assert!(reply.contains("#1"));

        let reply = run_issue(
            &ctx,
            serde_json::json!({"action": "resolve", "id": 1, "resolution": "pinned"}),
        )
        .await
        .unwrap();
        assert!(reply.contains("resolved"));

        // Resolving again reports not found
        let err = run_issue(
            &ctx,
            serde_json::json!({"action": "resolve", "id": 1, "resolution": "again"}),
        )
        .await
        .unwrap_err();
        assert!(err.contains("not found"));
    }
}
