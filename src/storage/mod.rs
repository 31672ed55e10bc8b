//! SQLite-backed persistence shared by the learning store and the
//! change-request tracker.
//!
//! One database file, WAL mode. SQLite's write locking gives the
//! read-modify-write cycles their cross-process exclusive-acquisition scope:
//! mutations run inside transactions, readers take snapshot reads without the
//! write lock (slightly stale confidence is acceptable).

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking a recovery run indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// How long a writer waits on SQLite's lock before failing.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Queries slower than this are logged at WARN.
const SLOW_QUERY: std::time::Duration = std::time::Duration::from_millis(100);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
pub(crate) async fn with_timeout<T>(
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Open (or create) the recovery database at `db_path`.
///
/// A missing file is created empty. An unreadable/corrupt file is moved
/// aside to `<name>.corrupt` and replaced with a fresh database — persistence
/// corruption is recoverable, never fatal.
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create database directory")?;
    }

    match try_open(db_path).await {
        Ok(pool) => Ok(pool),
        Err(e) => {
            let backup = db_path.with_extension("corrupt");
            warn!(
                path = %db_path.display(),
                backup = %backup.display(),
                err = %e,
                "database unreadable — moving aside and starting empty"
            );
            tokio::fs::rename(db_path, &backup)
                .await
                .context("failed to move corrupt database aside")?;
            try_open(db_path).await
        }
    }
}

async fn try_open(db_path: &Path) -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true)
        .log_slow_statements(log::LevelFilter::Warn, SLOW_QUERY);

    let pool = SqlitePool::connect_with(opts)
        .await
        .context("failed to open recovery database")?;

    // Cheap integrity probe — a truncated/corrupt file fails here and
    // triggers the move-aside path in `open_pool`.
    sqlx::query("SELECT count(*) FROM sqlite_master")
        .fetch_one(&pool)
        .await
        .context("recovery database failed integrity probe")?;

    Ok(pool)
}
