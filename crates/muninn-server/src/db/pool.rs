// crates/muninn-server/src/db/pool.rs
// Async connection pool using deadpool-sqlite.
//
// Database access goes through `pool.interact()` (anyhow::Result, internal
// helpers and background passes) or `pool.run()` (MuninnError, tool
// handlers). Both execute the closure on a blocking thread so the async
// runtime is never blocked. Critical writes use the `*_with_retry` variants,
// which back off on SQLITE_BUSY/SQLITE_LOCKED.
//
// In-memory pools use a shared-cache URI so every pooled connection sees the
// same database; this is what makes the test pool behave like a file DB.

use crate::error::MuninnError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, Pool, Runtime};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Registers the sqlite-vec extension globally (once per process).
/// Must run before any SQLite connection is opened.
static SQLITE_VEC_INIT: Once = Once::new();

#[allow(clippy::missing_transmute_annotations)]
pub(crate) fn ensure_sqlite_vec_registered() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init matches the signature sqlite3_auto_extension
        // expects; the pointer targets a statically linked symbol that lives
        // for the whole process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered globally");
    });
}

/// Check if a rusqlite error is SQLITE_BUSY or SQLITE_LOCKED.
fn is_rusqlite_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

fn is_muninn_contention(err: &MuninnError) -> bool {
    match err {
        MuninnError::Db(e) => is_rusqlite_contention(e),
        _ => false,
    }
}

/// Walk an anyhow chain looking for a SQLite contention error.
fn is_sqlite_contention(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<rusqlite::Error>() {
        return is_rusqlite_contention(e);
    }
    if let Some(e) = err.downcast_ref::<MuninnError>() {
        return is_muninn_contention(e);
    }
    false
}

/// Retry delays for SQLite contention backoff.
const RETRY_DELAYS: [std::time::Duration; 3] = [
    std::time::Duration::from_millis(100),
    std::time::Duration::from_millis(500),
    std::time::Duration::from_millis(2000),
];

async fn retry_with_backoff<F, Fut, R, E>(
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> std::result::Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<R, E>>,
    E: std::fmt::Display,
{
    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match op().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if is_retryable(&e) {
                    tracing::warn!(
                        "SQLite contention on attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        RETRY_DELAYS.len(),
                        delay
                    );
                    tokio::time::sleep(*delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
    op().await
}

/// Pooled store handle. Opening runs the full gate: corruption preflight,
/// pre-migration backup, migrations (logged when a log path is given), and
/// the structured integrity report.
#[derive(Debug)]
pub struct DatabasePool {
    pool: Pool,
    path: Option<PathBuf>,
    /// URI for in-memory databases (used to share state in tests)
    memory_uri: Option<String>,
}

enum DbStorage {
    File(PathBuf),
    InMemory,
}

impl DatabasePool {
    /// Open a pooled database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), "memory.db", None).await
    }

    /// Open with a label and migration-log path (the CLI uses this so
    /// transitions land in ~/.muninn/migrations.log).
    pub async fn open_logged(path: &Path, db_label: &str, log_path: Option<PathBuf>) -> Result<Self> {
        Self::open_internal(DbStorage::File(path.to_path_buf()), db_label, log_path).await
    }

    /// Open a pooled in-memory database (for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open_internal(DbStorage::InMemory, "memdb", None).await
    }

    async fn open_internal(
        storage: DbStorage,
        db_label: &str,
        log_path: Option<PathBuf>,
    ) -> Result<Self> {
        ensure_sqlite_vec_registered();

        let (conn_str, path, memory_uri, hook) = match storage {
            DbStorage::File(p) => {
                ensure_parent_directory(&p)?;
                let s = p.to_string_lossy().into_owned();
                let hook = make_file_post_create_hook(p.clone());
                (s, Some(p), None, hook)
            }
            DbStorage::InMemory => {
                let uri = format!("file:memdb_{:?}?mode=memory&cache=shared", uuid::Uuid::new_v4());
                (uri.clone(), None, Some(uri), make_memory_post_create_hook())
            }
        };

        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(8)
            .post_create(hook)
            .build()
            .context("Failed to build connection pool")?;

        let db_pool = Self {
            pool,
            path,
            memory_uri,
        };

        // Corruption preflight, then backup, then migrations, then the
        // structured report. A failed report refuses the handle.
        let expect_wal = db_pool.path.is_some();
        if let Some(ref db_path) = db_pool.path {
            let exists = db_path.exists();
            if exists {
                let ok = db_pool
                    .interact(|conn| Ok(super::integrity::preflight_ok(conn)))
                    .await?;
                if !ok {
                    return Err(MuninnError::Integrity(
                        "PRAGMA integrity_check failed before migrations".to_string(),
                    )
                    .into());
                }
            }
            if let Err(e) = Self::backup_before_migration(db_path) {
                tracing::warn!("Pre-migration backup failed (continuing anyway): {}", e);
            }
        }

        let label = db_label.to_string();
        db_pool
            .interact(move |conn| {
                super::schema::run_all_migrations_logged(conn, &label, log_path.as_deref())?;
                if let Err(e) = conn.execute_batch("PRAGMA optimize") {
                    tracing::debug!("PRAGMA optimize skipped: {}", e);
                }
                Ok(())
            })
            .await?;

        let report = db_pool
            .interact(move |conn| Ok(super::integrity::verify(conn, expect_wal)))
            .await?;
        if !report.is_ok() {
            return Err(MuninnError::Integrity(report.failure_summary()).into());
        }

        Ok(db_pool)
    }

    /// Get the memory URI (for sharing state in tests)
    pub fn memory_uri(&self) -> Option<&str> {
        self.memory_uri.as_deref()
    }

    /// Run a closure with a connection from the pool.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get connection from pool")?;

        conn.interact(move |conn| f(conn))
            .await
            .map_err(|e| anyhow::anyhow!("interact failed: {e}"))?
    }

    /// Run a closure on a pooled connection, logging errors at debug but not
    /// propagating. For best-effort operations (feedback rows, telemetry).
    pub async fn try_interact<F, R>(&self, label: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = label.to_string();
        match self.interact(move |conn| f(conn)).await {
            Ok(v) => Some(v),
            Err(e) => {
                crate::metrics::count_suppressed(&label, &e);
                None
            }
        }
    }

    /// Run a closure and return MuninnError for tool handlers.
    pub async fn run<F, R, E>(&self, f: F) -> std::result::Result<R, MuninnError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<MuninnError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| MuninnError::Other(format!("Failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| MuninnError::Other(format!("Database error: {}", e)))?
    }

    /// Like [`run`](Self::run) with backoff retry on contention. The closure
    /// must be `Clone` so it can be re-invoked.
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> std::result::Result<R, MuninnError>
    where
        F: FnOnce(&Connection) -> std::result::Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<MuninnError> + Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.run(f_clone)
            },
            is_muninn_contention,
        )
        .await
    }

    /// Like [`interact`](Self::interact) with backoff retry on contention.
    pub async fn interact_with_retry<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + Clone + 'static,
        R: Send + 'static,
    {
        retry_with_backoff(
            || {
                let f_clone = f.clone();
                self.interact(f_clone)
            },
            |e: &anyhow::Error| is_sqlite_contention(e),
        )
        .await
    }

    /// Get the database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Rebuild the FTS mirror tables from their backing tables.
    pub async fn rebuild_fts(&self) -> Result<()> {
        self.interact(|conn| super::schema::rebuild_fts(conn)).await
    }

    /// Re-run the integrity report on demand.
    pub async fn integrity_report(&self) -> Result<super::integrity::IntegrityReport> {
        let expect_wal = self.path.is_some();
        self.interact(move |conn| Ok(super::integrity::verify(conn, expect_wal)))
            .await
    }

    /// Get pool status for monitoring.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Create a backup before running migrations. Uses VACUUM INTO for an
    /// atomic, consistent copy; keeps at most one backup per database.
    fn backup_before_migration(path: &Path) -> Result<()> {
        let backup_path = path.with_extension("db.pre-migration");
        if !path.exists() {
            return Ok(());
        }

        let conn = rusqlite::Connection::open(path).context("Failed to open DB for backup")?;
        let _ = std::fs::remove_file(&backup_path);
        conn.execute("VACUUM INTO ?1", [backup_path.to_string_lossy().as_ref()])
            .context("Failed to create pre-migration backup")?;

        tracing::info!("Created pre-migration backup: {}", backup_path.display());
        Ok(())
    }
}

/// Pool status for monitoring.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Ensure parent directory exists with restricted permissions (0o700 on Unix).
fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            let mut perms = std::fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            std::fs::set_permissions(parent, perms)?;
        }
        #[cfg(not(unix))]
        tracing::debug!(
            "Skipping directory permission restriction on non-Unix platform: {}",
            parent.display()
        );
    }
    Ok(())
}

/// post_create hook for file-based databases: reliability pragmas + 0o600.
fn make_file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path_for_perms = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                setup_connection(conn)?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path_for_perms) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path_for_perms, perms) {
                        tracing::warn!("Failed to set database file permissions to 0600: {}", e);
                    }
                }
                #[cfg(not(unix))]
                tracing::debug!(
                    "Skipping DB file permission restriction on non-Unix platform: {}",
                    path_for_perms.display()
                );

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// post_create hook for in-memory databases (WAL does not apply).
fn make_memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch(
                    "PRAGMA foreign_keys=ON; \
                     PRAGMA busy_timeout=5000;",
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
            })?
            .map_err(|e| {
                deadpool_sqlite::HookError::Message(format!("connection setup failed: {e}").into())
            })
        })
    })
}

/// Reliability pragmas applied to every file-backed connection.
fn setup_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; \
         PRAGMA foreign_keys=ON; \
         PRAGMA busy_timeout=5000; \
         PRAGMA synchronous=NORMAL; \
         PRAGMA journal_size_limit=32768;",
    )?;
    Ok(())
}
