//! The idempotency ledger
//!
//! One row per completed (source, date) unit of work, kept in a small
//! SQLite database. The engine consults it before a phase runs and
//! appends to it when a phase commits. Rows are never updated and never
//! deleted here: a forced re-run appends fresh rows, and the gate only
//! asks whether *any* row exists for a source and range.

use crate::error::EtlError;
use gleaner_common::DateRange;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;

/// Append-only log of committed (source, date) work
pub struct History {
    pool: SqlitePool,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl History {
    /// Open (and create if missing) the ledger database.
    pub async fn open(url: &str) -> Result<Self, EtlError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                date TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // No uniqueness constraint: the gate only needs existence, and
        // forced re-runs append rather than upsert.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_history_source_date
            ON history(source_id, date)
            "#,
        )
        .execute(&pool)
        .await?;

        debug!(url = %url, "Ledger opened");
        Ok(Self {
            pool,
            tx: Mutex::new(None),
        })
    }

    /// True if any entry for `source_id` falls inside the range
    /// (endpoints included).
    pub async fn exists(&self, source_id: &str, range: DateRange) -> Result<bool, EtlError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM history WHERE source_id = ? AND date BETWEEN ? AND ?",
        )
        .bind(source_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Record one entry per (date, source) pair for every day in the
    /// range. Joins the open transaction when there is one.
    pub async fn add_entry(&self, source_ids: &[&str], range: DateRange) -> Result<(), EtlError> {
        let mut guard = self.tx.lock().await;
        for day in range.days() {
            for &source_id in source_ids {
                let insert =
                    sqlx::query("INSERT INTO history (source_id, date) VALUES (?, ?)")
                        .bind(source_id)
                        .bind(day);
                match guard.as_mut() {
                    Some(tx) => insert.execute(&mut **tx).await?,
                    None => insert.execute(&self.pool).await?,
                };
            }
        }
        debug!(
            sources = source_ids.len(),
            days = range.num_days(),
            "Recorded ledger entries"
        );
        Ok(())
    }

    /// Open the ledger's transaction. Errors if one is already open.
    pub async fn start_transaction(&self) -> Result<(), EtlError> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(EtlError::Transaction(
                "a ledger transaction is already open".to_string(),
            ));
        }
        *guard = Some(self.pool.begin().await?);
        Ok(())
    }

    /// Commit the open transaction, if any. The open-transaction marker
    /// is cleared before the commit is attempted, so a failed commit
    /// does not wedge the ledger.
    pub async fn commit_transaction(&self) -> Result<(), EtlError> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back the open transaction, if any.
    pub async fn rollback_transaction(&self) -> Result<(), EtlError> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        Ok(())
    }
}
