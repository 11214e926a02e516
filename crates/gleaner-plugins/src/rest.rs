//! REST API record source
//!
//! `rest-read` walks a JSON endpoint that serves `objects` pages with a
//! `meta.next` cursor. Each object's `recorded` field becomes the record
//! date; the rest of the object is the payload. The stream is lazy: a
//! page is fetched only when the engine pulls past the buffered items.

use crate::REQUEST_TIMEOUT_SECS;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use futures::stream;
use gleaner_common::DateRange;
use gleaner_core::{EtlError, PluginError, PluginOptions, Record, RecordStream, Source};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Registry constructor for `rest-read`.
pub fn source(options: &PluginOptions) -> Result<Arc<dyn Source>, EtlError> {
    Ok(Arc::new(RestSource::from_options(options)?))
}

/// One page of the upstream API
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    objects: Vec<serde_json::Value>,
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    next: Option<String>,
}

/// Paginated JSON API reader
pub struct RestSource {
    id: String,
    client: Client,
    endpoint: String,
    kind: String,
    auth: Option<(String, String)>,
    purge_enabled: bool,
}

impl RestSource {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|err| {
                EtlError::plugin(options.id(), format!("failed to build HTTP client: {}", err))
            })?;

        let auth = match (options.get_str("username")?, options.get_str("password")?) {
            (Some(username), Some(password)) => {
                Some((username.to_string(), password.to_string()))
            },
            (None, None) => None,
            _ => {
                return Err(EtlError::config(format!(
                    "source '{}': options 'username' and 'password' must be set together",
                    options.id()
                )))
            },
        };

        Ok(Self {
            id: options.id().to_string(),
            client,
            endpoint: options.require_str("endpoint")?.to_string(),
            kind: options.require_str("kind")?.to_string(),
            auth,
            purge_enabled: options.get_bool("purge")?.unwrap_or(false),
        })
    }

    fn ranged_url(&self, range: DateRange) -> Result<Url, PluginError> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("start", range.start.to_string()),
                ("end", range.end.to_string()),
            ],
        )
        .map_err(|err| {
            PluginError::message(format!("invalid endpoint '{}': {}", self.endpoint, err))
        })
    }
}

/// Owned cursor state moved through the page stream
struct PageWalk {
    client: Client,
    auth: Option<(String, String)>,
    kind: String,
    next: Option<Url>,
    buffered: std::vec::IntoIter<serde_json::Value>,
}

#[async_trait]
impl Source for RestSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, range: DateRange) -> Result<RecordStream, PluginError> {
        let walk = PageWalk {
            client: self.client.clone(),
            auth: self.auth.clone(),
            kind: self.kind.clone(),
            next: Some(self.ranged_url(range)?),
            buffered: Vec::new().into_iter(),
        };

        let stream = stream::try_unfold(walk, |mut walk| async move {
            loop {
                if let Some(item) = walk.buffered.next() {
                    let record = item_to_record(item, &walk.kind)?;
                    return Ok(Some((record, walk)));
                }
                let Some(url) = walk.next.take() else {
                    return Ok(None);
                };
                let Some(page) = fetch_page(&walk.client, walk.auth.as_ref(), url.clone()).await?
                else {
                    return Ok(None);
                };
                walk.next = match page.meta.and_then(|meta| meta.next) {
                    Some(next) => Some(url.join(&next).map_err(|err| {
                        PluginError::message(format!("bad pagination cursor '{}': {}", next, err))
                    })?),
                    None => None,
                };
                walk.buffered = page.objects.into_iter();
            }
        });

        Ok(Box::pin(stream))
    }

    /// Ranged DELETE against the endpoint, when enabled.
    async fn purge(&self, range: DateRange) -> Result<(), PluginError> {
        if !self.purge_enabled {
            return Ok(());
        }
        let url = self.ranged_url(range)?;
        info!(source = %self.id, url = %url, "Purging upstream staging data");

        let mut request = self.client.delete(url.clone());
        if let Some((username, password)) = &self.auth {
            request = request.basic_auth(username, Some(password));
        }
        let response = request
            .send()
            .await
            .map_err(|err| PluginError::message(err.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(PluginError::server(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(PluginError::message(format!("{} returned {}", url, status)));
        }
        Ok(())
    }
}

/// Fetch one page. `None` means the cursor is gone and pagination is
/// simply over (deleted staging data on the upstream side).
async fn fetch_page(
    client: &Client,
    auth: Option<&(String, String)>,
    url: Url,
) -> Result<Option<Page>, PluginError> {
    debug!(url = %url, "Fetching page");
    let mut request = client.get(url.clone());
    if let Some((username, password)) = auth {
        request = request.basic_auth(username, Some(password));
    }
    let response = request
        .send()
        .await
        .map_err(|err| PluginError::message(err.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Ok(None);
    }
    if status.is_server_error() {
        return Err(PluginError::server(format!("{} returned {}", url, status)));
    }
    if !status.is_success() {
        return Err(PluginError::message(format!("{} returned {}", url, status)));
    }
    let page = response.json().await.map_err(|err| {
        PluginError::message(format!("invalid JSON from {}: {}", url, err))
    })?;
    Ok(Some(page))
}

fn item_to_record(item: serde_json::Value, kind: &str) -> Result<Record, PluginError> {
    let serde_json::Value::Object(mut fields) = item else {
        return Err(PluginError::message("API item is not a JSON object"));
    };
    let recorded = fields
        .remove("recorded")
        .ok_or_else(|| PluginError::message("API item has no 'recorded' field"))?;
    let date = parse_recorded(&recorded)?;

    let mut record = Record::new(date, kind);
    record.payload = fields;
    Ok(record)
}

fn parse_recorded(value: &serde_json::Value) -> Result<NaiveDate, PluginError> {
    let text = value
        .as_str()
        .ok_or_else(|| PluginError::message("'recorded' field is not a string"))?;
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .map(|datetime| datetime.date())
        .map_err(|_| PluginError::message(format!("cannot parse 'recorded' date '{}'", text)))
}
