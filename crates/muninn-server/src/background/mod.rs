// crates/muninn-server/src/background/mod.rs
// Background worker for idle-time processing: fragility scans and the
// session-end learning pipeline for sessions the foreground path missed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::db::pool::DatabasePool;
use crate::fragility;
use crate::learning;

/// Files scored per fragility batch. One batch is one pool interaction, so
/// this is also the worker's cancellation granularity.
const FRAGILITY_BATCH: usize = 500;
/// Sessions processed per learning batch.
const LEARNING_BATCH: usize = 10;
/// Fragility runs every Nth cycle; learning runs every cycle.
const FRAGILITY_EVERY: u64 = 5;

/// Background worker configuration
pub struct BackgroundWorker {
    pool: Arc<DatabasePool>,
    project_id: i64,
    shutdown: watch::Receiver<bool>,
    cycle_count: u64,
}

impl BackgroundWorker {
    pub fn new(pool: Arc<DatabasePool>, project_id: i64, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            pool,
            project_id,
            shutdown,
            cycle_count: 0,
        }
    }

    /// Start the background worker loop
    pub async fn run(mut self) {
        tracing::info!("Background worker started");

        // Initial delay to let the service start up
        tokio::time::sleep(Duration::from_secs(30)).await;

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("Background worker shutting down");
                break;
            }

            match self.process_batch().await {
                Ok(processed) if processed > 0 => {
                    tracing::info!("Background worker processed {} items", processed);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(_) => {
                    // No work found, sleep longer with a little jitter so
                    // several projects' workers do not wake in lockstep.
                    let jitter = rand::random::<u64>() % 10;
                    tokio::time::sleep(Duration::from_secs(60 + jitter)).await;
                }
                Err(e) => {
                    tracing::warn!("Background worker error: {}", e);
                    tokio::time::sleep(Duration::from_secs(120)).await;
                }
            }

            if self.shutdown.has_changed().unwrap_or(false) && *self.shutdown.borrow() {
                break;
            }
        }
    }

    /// One cycle of work. Shutdown is honored between passes.
    async fn process_batch(&mut self) -> Result<usize, String> {
        let mut processed = 0;
        self.cycle_count += 1;

        // Learning pipeline for sessions that ended without the foreground
        // path finishing their passes.
        let count = self.process_pending_learning().await?;
        if count > 0 {
            tracing::info!("Background: processed {} session pipelines", count);
        }
        processed += count;

        if *self.shutdown.borrow() {
            return Ok(processed);
        }

        // Fragility scan, staggered to every Nth cycle.
        if self.cycle_count % FRAGILITY_EVERY == 1 {
            let count = self.process_fragility().await?;
            if count > 0 {
                tracing::info!("Background: rescored {} files", count);
            }
            processed += count;
        }

        Ok(processed)
    }

    async fn process_pending_learning(&self) -> Result<usize, String> {
        let project_id = self.project_id;
        let reports = self
            .pool
            .interact(move |conn| {
                learning::process_pending_sessions_sync(conn, project_id, LEARNING_BATCH)
                    .map_err(Into::into)
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(reports.iter().filter(|r| !r.skipped).count())
    }

    async fn process_fragility(&self) -> Result<usize, String> {
        let project_id = self.project_id;
        let result = self
            .pool
            .interact(move |conn| {
                fragility::compute_project_fragility_sync(conn, project_id, FRAGILITY_BATCH)
                    .map_err(Into::into)
            })
            .await
            .map_err(|e| e.to_string())?;
        Ok(result.updated)
    }
}

/// Spawn the background worker. Returns the shutdown sender.
pub fn spawn(pool: Arc<DatabasePool>, project_id: i64) -> watch::Sender<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = BackgroundWorker::new(pool, project_id, shutdown_rx);
    tokio::spawn(async move {
        worker.run().await;
    });
    shutdown_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::test_support::setup_test_pool_with_project;

    #[tokio::test]
    async fn test_process_batch_runs_pending_pipelines() {
        let (pool, project_id) = setup_test_pool_with_project().await;

        pool.interact(move |conn| {
            let session = db::start_session_sync(conn, project_id, None)?;
            db::log_tool_call_sync(conn, project_id, session, "edit_file", "", "a.rs", true)?;
            db::end_session_sync(conn, session, None, Some(2), &["a.rs".to_string()])?;
            Ok(())
        })
        .await
        .unwrap();

        let (_tx, rx) = watch::channel(false);
        let mut worker = BackgroundWorker::new(pool.clone(), project_id, rx);
        let processed = worker.process_batch().await.unwrap();
        assert!(processed >= 1);

        // Second batch finds nothing new
        let processed = worker.process_batch().await.unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn test_fragility_pass_scores_files() {
        let (pool, project_id) = setup_test_pool_with_project().await;
        pool.interact(move |conn| {
            db::upsert_file_sync(conn, project_id, "src/core.rs", None, None)?;
            db::replace_call_edges_sync(conn, project_id, "src/a.rs", &["src/core.rs".into()])?;
            Ok(())
        })
        .await
        .unwrap();

        let (_tx, rx) = watch::channel(false);
        let worker = BackgroundWorker::new(pool.clone(), project_id, rx);
        let updated = worker.process_fragility().await.unwrap();
        assert_eq!(updated, 1);
    }

    #[tokio::test]
    async fn test_spawned_worker_honors_shutdown() {
        let (pool, project_id) = setup_test_pool_with_project().await;
        let shutdown = spawn(pool, project_id);
        // Request shutdown immediately; the worker must not panic.
        shutdown.send(true).unwrap();
    }
}
