use anyhow::Result as AnyResult;
use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::path::Path;

use crate::model::DECODE_ERROR;
use crate::{AppError, AppResult};

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target = "acta",
                error = %e,
                event = "db_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target = "acta", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys=ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA wal_autocheckpoint = 1000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "acta",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target = "acta",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Opens a transaction holding the write lock from its first statement.
///
/// A deferred `BEGIN` that reads and then writes cannot upgrade its lock in
/// WAL mode once another connection has committed, and fails with
/// `SQLITE_BUSY` without waiting on `busy_timeout`. Every read-modify-write
/// path starts with this instead.
pub const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

/// Run work inside a write transaction. Commits on success, rolls back on error.
///
/// The closure receives the open transaction and returns a boxed future, e.g.
/// `run_in_tx(&pool, |tx| async move { ...; Ok(()) }.boxed())`. Values the
/// future needs must be moved in as owned data.
pub async fn run_in_tx<R, E, F>(pool: &Pool<Sqlite>, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{debug, error, warn};

    let mut tx = pool.begin_with(BEGIN_IMMEDIATE).await.map_err(E::from)?;
    debug!(target = "acta", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            debug!(target = "acta", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target = "acta", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target = "acta", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}

pub(crate) const STORE_FAILURE: &str = "STORE/FAILURE";

/// Wraps an unexpected storage error, keeping the original as the cause.
pub(crate) fn wrap_unexpected(err: AppError, operation: &'static str) -> AppError {
    AppError::new(STORE_FAILURE, "The task store could not complete the request.")
        .with_context("operation", operation)
        .with_cause(err)
}

/// Reads one column, reporting a decode failure with the column name.
pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> AppResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<T, _>(name).map_err(|err| {
        AppError::new(DECODE_ERROR, format!("Could not read column {name}"))
            .with_context("column", name.to_string())
            .with_context("error", err.to_string())
    })
}
