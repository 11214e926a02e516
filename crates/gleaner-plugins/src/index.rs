//! Search index bulk writer
//!
//! `index-write` posts NDJSON `_bulk` bodies to an HTTP search index,
//! one document per record, routed to a monthly index derived from the
//! record date. There are no transaction verbs to override; retry-safety
//! comes from `clear`, which issues a `_delete_by_query` over the same
//! monthly indices.

use crate::REQUEST_TIMEOUT_SECS;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use gleaner_common::DateRange;
use gleaner_core::{EtlError, PluginError, PluginOptions, SourcedRecord, Target};
use reqwest::{Client, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_INDEX_PREFIX: &str = "records";

/// Registry constructor for `index-write`.
pub fn target(options: &PluginOptions) -> Result<Arc<dyn Target>, EtlError> {
    Ok(Arc::new(IndexTarget::from_options(options)?))
}

pub struct IndexTarget {
    id: String,
    client: Client,
    base: Url,
    prefix: String,
}

impl IndexTarget {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| {
                EtlError::plugin(options.id(), format!("failed to build HTTP client: {}", err))
            })?;

        let raw = options.require_str("url")?;
        let mut base = Url::parse(raw).map_err(|err| {
            EtlError::config(format!("target '{}': invalid url '{}': {}", options.id(), raw, err))
        })?;
        // Joining relative paths replaces the last segment unless the
        // base path ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            id: options.id().to_string(),
            client,
            base,
            prefix: options
                .get_str("index_prefix")?
                .unwrap_or(DEFAULT_INDEX_PREFIX)
                .to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PluginError> {
        self.base
            .join(path)
            .map_err(|err| PluginError::message(format!("bad index path '{}': {}", path, err)))
    }
}

#[async_trait]
impl Target for IndexTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for sourced in batch {
            let action = serde_json::json!({
                "index": {
                    "_index": month_index(&self.prefix, sourced.record.date),
                    "_id": Uuid::new_v4().to_string(),
                }
            });
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(sourced)?);
            body.push('\n');
        }

        let url = self.endpoint("_bulk")?;
        debug!(target = %self.id, docs = batch.len(), "Posting bulk body");
        let response = self
            .client
            .post(url.clone())
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|err| PluginError::message(err.to_string()))?;
        check_status(&url, response.status())?;

        let result: serde_json::Value = response.json().await.map_err(|err| {
            PluginError::message(format!("invalid JSON from {}: {}", url, err))
        })?;
        if result.get("errors").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(PluginError::message(
                "search index reported item-level failures in the bulk response",
            ));
        }
        Ok(())
    }

    async fn clear(&self, range: DateRange, source_ids: &[String]) -> Result<u64, PluginError> {
        if source_ids.is_empty() {
            return Ok(0);
        }

        let indices = month_indices(&self.prefix, range).join(",");
        let mut url = self.endpoint(&format!("{}/_delete_by_query", indices))?;
        // Monthly indices the pipeline never wrote simply do not exist.
        url.query_pairs_mut().append_pair("ignore_unavailable", "true");

        let body = serde_json::json!({
            "query": {
                "bool": {
                    "filter": [
                        { "terms": { "source_id": source_ids } },
                        { "range": { "date": {
                            "gte": range.start.to_string(),
                            "lte": range.end.to_string(),
                        }}},
                    ]
                }
            }
        });

        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| PluginError::message(err.to_string()))?;
        check_status(&url, response.status())?;

        let result: serde_json::Value = response.json().await.map_err(|err| {
            PluginError::message(format!("invalid JSON from {}: {}", url, err))
        })?;
        Ok(result.get("deleted").and_then(|v| v.as_u64()).unwrap_or(0))
    }
}

fn check_status(url: &Url, status: StatusCode) -> Result<(), PluginError> {
    if status.is_server_error() {
        return Err(PluginError::server(format!("{} returned {}", url, status)));
    }
    if !status.is_success() {
        return Err(PluginError::message(format!("{} returned {}", url, status)));
    }
    Ok(())
}

fn month_index(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{:04}_{:02}", prefix, date.year(), date.month())
}

/// Every monthly index the range touches, in order.
fn month_indices(prefix: &str, range: DateRange) -> Vec<String> {
    let mut names = Vec::new();
    let (mut year, mut month) = (range.start.year(), range.start.month());
    let end = (range.end.year(), range.end.month());
    loop {
        names.push(format!("{}_{:04}_{:02}", prefix, year, month));
        if (year, month) >= end {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    names
}
