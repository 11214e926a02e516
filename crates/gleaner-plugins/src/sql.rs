//! SQL source and target over SQLite
//!
//! `sql-read` runs a configured query with the range bound as two
//! positional parameters and turns each row into a record: the `date`
//! column is structural, a `kind` column (or the `kind` option) tags the
//! record, every other column lands in the payload.
//!
//! `sql-write` persists batches into a `records` table it creates on
//! demand, with real transactions joined by the engine's verbs.

use crate::REQUEST_POOL_SIZE;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream;
use gleaner_common::DateRange;
use gleaner_core::{
    EtlError, PluginError, PluginOptions, Record, RecordStream, Source, SourcedRecord, Target,
};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Transaction, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_source_date ON records (source_id, date);
"#;

/// Registry constructor for `sql-read`.
pub fn source(options: &PluginOptions) -> Result<Arc<dyn Source>, EtlError> {
    Ok(Arc::new(SqlSource::from_options(options)?))
}

/// Registry constructor for `sql-write`.
pub fn target(options: &PluginOptions) -> Result<Arc<dyn Target>, EtlError> {
    Ok(Arc::new(SqlTarget::from_options(options)?))
}

fn open_pool(
    options: &PluginOptions,
    create_if_missing: bool,
) -> Result<Pool<Sqlite>, EtlError> {
    let url = options.database_url("database")?;
    let connect = SqliteConnectOptions::from_str(&url)
        .map_err(|err| {
            EtlError::plugin(options.id(), format!("invalid database URL '{}': {}", url, err))
        })?
        .create_if_missing(create_if_missing);
    Ok(SqlitePoolOptions::new()
        .max_connections(REQUEST_POOL_SIZE)
        .connect_lazy_with(connect))
}

/// Query-driven record source
pub struct SqlSource {
    id: String,
    pool: Pool<Sqlite>,
    query: String,
    fallback_kind: Option<String>,
}

impl SqlSource {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        Ok(Self {
            id: options.id().to_string(),
            pool: open_pool(options, false)?,
            query: options.require_str("query")?.to_string(),
            fallback_kind: options.get_str("kind")?.map(str::to_string),
        })
    }

    fn row_to_record(&self, row: &SqliteRow) -> Result<Record, PluginError> {
        let mut date = None;
        let mut kind = None;
        let mut payload = Vec::new();

        for (idx, column) in row.columns().iter().enumerate() {
            match column.name() {
                "date" => date = Some(decode_date(row, idx)?),
                "kind" => {
                    kind = Some(row.try_get::<String, _>(idx).map_err(|err| {
                        PluginError::message(format!("'kind' column must be text: {}", err))
                    })?);
                },
                name => {
                    let value = sqlite_value_to_json(row, idx, column.type_info().name())?;
                    payload.push((name.to_string(), value));
                },
            }
        }

        let date = date
            .ok_or_else(|| PluginError::message("query result has no 'date' column"))?;
        let kind = kind
            .or_else(|| self.fallback_kind.clone())
            .ok_or_else(|| {
                PluginError::message(
                    "query result has no 'kind' column and no 'kind' option is set",
                )
            })?;

        let mut record = Record::new(date, kind);
        for (key, value) in payload {
            if !value.is_null() {
                record.payload.insert(key, value);
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl Source for SqlSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, range: DateRange) -> Result<RecordStream, PluginError> {
        debug!(source = %self.id, range = %range, "Running extraction query");
        let rows = sqlx::query(&self.query)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await?;

        let records: Vec<Result<Record, PluginError>> = rows
            .iter()
            .map(|row| self.row_to_record(row))
            .collect();
        Ok(Box::pin(stream::iter(records)))
    }
}

fn decode_date(row: &SqliteRow, idx: usize) -> Result<NaiveDate, PluginError> {
    if let Ok(date) = row.try_get::<NaiveDate, _>(idx) {
        return Ok(date);
    }
    // SQLite has no date type; cope with plain text columns.
    let text: String = row.try_get(idx).map_err(|err| {
        PluginError::message(format!("'date' column is neither a date nor text: {}", err))
    })?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|_| PluginError::message(format!("cannot parse date '{}'", text)))
}

fn sqlite_value_to_json(
    row: &SqliteRow,
    idx: usize,
    type_name: &str,
) -> Result<serde_json::Value, PluginError> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(serde_json::Value::Null);
    }

    let value = match type_name {
        "BOOLEAN" => {
            let v: bool = row.try_get(idx)?;
            serde_json::Value::Bool(v)
        },
        "INTEGER" | "INT4" | "INT8" | "BIGINT" => {
            let v: i64 = row.try_get(idx)?;
            serde_json::Value::Number(v.into())
        },
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => {
            let v: f64 = row.try_get(idx)?;
            serde_json::json!(v)
        },
        _ => {
            // Everything else round-trips as text.
            let v: String = row
                .try_get(idx)
                .unwrap_or_else(|_| format!("<{}>", type_name));
            serde_json::Value::String(v)
        },
    };

    Ok(value)
}

/// Warehouse-style batch writer
pub struct SqlTarget {
    id: String,
    pool: Pool<Sqlite>,
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

impl SqlTarget {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        Ok(Self {
            id: options.id().to_string(),
            pool: open_pool(options, true)?,
            tx: Mutex::new(None),
        })
    }

    async fn ensure_schema(&self) -> Result<(), PluginError> {
        sqlx::raw_sql(CREATE_RECORDS_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

async fn insert_into<'e, E>(executor: E, sourced: &SourcedRecord) -> Result<(), PluginError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&sourced.record.payload)?;
    sqlx::query("INSERT INTO records (id, date, kind, source_id, payload) VALUES (?, ?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(sourced.record.date)
        .bind(&sourced.record.kind)
        .bind(&sourced.source_id)
        .bind(payload)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl Target for SqlTarget {
    fn id(&self) -> &str {
        &self.id
    }

    /// Insert the batch into the open transaction, or autonomously when
    /// no transaction is running.
    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError> {
        let mut guard = self.tx.lock().await;
        match guard.as_mut() {
            Some(tx) => {
                for sourced in batch {
                    insert_into(&mut **tx, sourced).await?;
                }
            },
            None => {
                self.ensure_schema().await?;
                for sourced in batch {
                    insert_into(&self.pool, sourced).await?;
                }
            },
        }
        Ok(())
    }

    async fn clear(&self, range: DateRange, source_ids: &[String]) -> Result<u64, PluginError> {
        if source_ids.is_empty() {
            return Ok(0);
        }
        self.ensure_schema().await?;

        let placeholders = vec!["?"; source_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM records WHERE source_id IN ({}) AND date >= ? AND date <= ?",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for source_id in source_ids {
            query = query.bind(source_id);
        }
        let result = query
            .bind(range.start)
            .bind(range.end)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn start_transaction(&self) -> Result<(), PluginError> {
        self.ensure_schema().await?;
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(PluginError::message("a transaction is already running"));
        }
        *guard = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), PluginError> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), PluginError> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        Ok(())
    }
}
