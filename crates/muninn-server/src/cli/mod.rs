// crates/muninn-server/src/cli/mod.rs
// Command-line interface: tool dispatch, store checks, fragility scans.

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::RwLock;

use muninn::config::{self, EnvConfig};
use muninn::db::pool::DatabasePool;
use muninn::db::{self, StoreAdapter};
use muninn::error::MuninnError;
use muninn::tools::{self, ToolContext};
use muninn_types::ProjectContext;

#[derive(Parser)]
#[command(name = "muninn")]
#[command(about = "Per-project coding-context memory engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Invoke a tool verb with JSON arguments
    Tool {
        name: String,
        /// JSON arguments (defaults to {})
        args: Option<String>,
    },
    /// Risk assessment for files
    Check { files: Vec<String> },
    /// Run the fragility scorer over the project
    Score {
        #[arg(long, default_value_t = 500)]
        max_files: usize,
    },
    /// Store integrity, pool, and counter status
    Status,
    /// Run the background worker in the foreground
    Work,
}

/// CLI-process tool context: one project, resolved from the working
/// directory, over the mode-selected store adapter.
struct CliContext {
    store: Arc<dyn StoreAdapter>,
    config: EnvConfig,
    project: RwLock<Option<ProjectContext>>,
    session: RwLock<Option<i64>>,
}

#[async_trait]
impl ToolContext for CliContext {
    fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    fn config(&self) -> &EnvConfig {
        &self.config
    }

    async fn get_project(&self) -> Option<ProjectContext> {
        self.project.read().await.clone()
    }

    async fn set_project(&self, project: ProjectContext) {
        *self.project.write().await = Some(project);
    }

    async fn get_session_id(&self) -> Option<i64> {
        *self.session.read().await
    }

    async fn set_session_id(&self, session_id: Option<i64>) {
        *self.session.write().await = session_id;
    }
}

/// Open the store for the current working directory and resolve its
/// project row. Rename detection runs in local mode only.
async fn open_context() -> Result<CliContext, MuninnError> {
    let env = EnvConfig::from_env();
    let cwd = std::env::current_dir()
        .map_err(|e| MuninnError::Config(format!("cannot determine cwd: {e}")))?;
    let db_path = config::project_db_path(&cwd);
    let store = db::open_store(&env, &db_path).await?;

    let ctx = CliContext {
        store,
        config: env,
        project: RwLock::new(None),
        session: RwLock::new(None),
    };

    if let Ok(pool) = ctx.pool() {
        let path = cwd.to_string_lossy().into_owned();
        let project = pool
            .run(move |conn| db::ensure_project_sync(conn, &path, None, true))
            .await?;
        ctx.set_project(ProjectContext {
            id: project.id,
            path: project.path,
            name: project.name,
        })
        .await;
    }

    Ok(ctx)
}

pub async fn run_tool(name: String, args: Option<String>) -> Result<(), MuninnError> {
    let ctx = open_context().await?;
    let parsed: serde_json::Value = match args {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| MuninnError::InvalidInput(format!("args must be JSON: {e}")))?,
        None => serde_json::json!({}),
    };

    match tools::dispatch(&ctx, &name, parsed).await {
        Ok(reply) => {
            println!("{reply}");
            Ok(())
        }
        Err(message) => Err(MuninnError::InvalidInput(message)),
    }
}

pub async fn run_check(files: Vec<String>) -> Result<(), MuninnError> {
    let ctx = open_context().await?;
    let reply = tools::dispatch(&ctx, "check", serde_json::json!({ "files": files }))
        .await
        .map_err(MuninnError::InvalidInput)?;
    println!("{reply}");
    Ok(())
}

pub async fn run_score(max_files: usize) -> Result<(), MuninnError> {
    let ctx = open_context().await?;
    let project_id = ctx.project_id().await.ok_or(MuninnError::ProjectNotSet)?;
    let pool = ctx.pool()?;

    let result = pool
        .run(move |conn| {
            muninn::fragility::compute_project_fragility_sync(conn, project_id, max_files)
        })
        .await?;
    println!(
        "scored {} files, {} changed",
        result.computed, result.updated
    );
    Ok(())
}

pub async fn run_status() -> Result<(), MuninnError> {
    let ctx = open_context().await?;
    let pool = ctx.pool()?;

    let report = pool
        .integrity_report()
        .await
        .map_err(|e| MuninnError::Other(e.to_string()))?;
    let status = pool.status();

    let payload = serde_json::json!({
        "mode": ctx.config().mode.as_str(),
        "integrity": report,
        "pool": {
            "size": status.size,
            "available": status.available,
            "waiting": status.waiting,
        },
        "suppressed_errors": muninn::metrics::suppressed_snapshot()
            .into_iter()
            .map(|(context, count)| serde_json::json!({"context": context, "count": count}))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

pub async fn run_work() -> Result<(), MuninnError> {
    let ctx = open_context().await?;
    let project_id = ctx.project_id().await.ok_or(MuninnError::ProjectNotSet)?;
    let pool: Arc<DatabasePool> = ctx.pool()?.clone();

    let shutdown = muninn::background::spawn(pool, project_id);
    tracing::info!("worker running; ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MuninnError::Other(e.to_string()))?;
    let _ = shutdown.send(true);
    Ok(())
}
