// crates/muninn-server/src/tools/core/session.rs
// Session lifecycle, operation approval, and the raw passthrough.

use serde::Deserialize;

use super::{ToolContext, parse_args, require_project};
use crate::db;
use crate::learning;
use crate::validation::{self, MAX_CONTENT_LEN, SessionRequest};

pub async fn run_session(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: SessionRequest = parse_args(args)?;
    request.validate().map_err(|e| e.to_string())?;

    let project_id = require_project(ctx).await?;
    let pool = ctx.pool().map_err(|e| e.to_string())?;

    match request {
        SessionRequest::Start { goal } => {
            let session_id = pool
                .run_with_retry(move |conn| {
                    db::start_session_sync(conn, project_id, goal.as_deref())
                })
                .await
                .map_err(|e| e.to_string())?;
            ctx.set_session_id(Some(session_id)).await;
            Ok(format!("session #{session_id} started"))
        }
        SessionRequest::End {
            id,
            outcome,
            success,
            files,
        } => {
            // Ending runs the full learning pipeline on the spot; the
            // background worker only catches sessions this path missed.
            let report = pool
                .run(move |conn| {
                    db::end_session_sync(conn, id, outcome.as_deref(), success, &files)?;
                    learning::run_session_pipeline_sync(conn, project_id, id)
                })
                .await
                .map_err(|e| e.to_string())?;

            if ctx.get_session_id().await == Some(id) {
                ctx.set_session_id(None).await;
            }

            let mut summary = format!(
                "session #{id} ended: {} (score {:.2})",
                learning::outcome_label(report.success),
                report.outcome_score
            );
            if let Some(verdict) = report.ab_verdict {
                summary.push_str(&format!("; experiment concluded: {verdict}"));
            }
            Ok(summary)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(rename = "operationId")]
    pub operation_id: String,
}

/// Approve a queued write operation. The core keeps no queue of its own;
/// outer layers park risky operations and resubmit them through this verb,
/// so an id that is not parked is simply unknown.
pub async fn run_approve(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: ApproveRequest = parse_args(args)?;
    validation::validate_text("approve.operationId", &request.operation_id, 100)
        .map_err(|e| e.to_string())?;
    let _ = ctx;
    Err(format!(
        "not found: no pending operation {}",
        request.operation_id
    ))
}

#[derive(Debug, Deserialize)]
pub struct PassthroughRequest {
    pub command: String,
}

/// Ship one raw statement through the store adapter. This is the narrow
/// dynamic escape hatch; everything else goes through typed queries.
pub async fn run_passthrough(
    ctx: &impl ToolContext,
    args: serde_json::Value,
) -> Result<String, String> {
    let request: PassthroughRequest = parse_args(args)?;
    if request.command.trim().is_empty() {
        return Err("passthrough.command: must not be empty".to_string());
    }
    if request.command.len() > MAX_CONTENT_LEN {
        return Err(format!(
            "passthrough.command: length {} exceeds cap {MAX_CONTENT_LEN}",
            request.command.len()
        ));
    }

    let rows = ctx
        .store()
        .all(&request.command, vec![])
        .await
        .map_err(|e| e.to_string())?;

    let rendered: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|(column, value)| {
                    let json = match value {
                        db::SqlValue::Null => serde_json::Value::Null,
                        db::SqlValue::Integer(v) => serde_json::json!(v),
                        db::SqlValue::Real(v) => serde_json::json!(v),
                        db::SqlValue::Text(v) => serde_json::json!(v),
                        db::SqlValue::Blob(v) => serde_json::json!(format!("<{} bytes>", v.len())),
                    };
                    (column.clone(), json)
                })
                .collect::<serde_json::Map<String, serde_json::Value>>()
                .into()
        })
        .collect();

    serde_json::to_string_pretty(&rendered).map_err(|e| e.to_string())
}
