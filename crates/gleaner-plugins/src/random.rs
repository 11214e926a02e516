//! Synthetic data source
//!
//! `random` fabricates download/usage figures for a fixed catalog of
//! items, one row per item per day. Item identity (the `item_uuid`
//! field) is stable across the days of a single run, so downstream
//! grouping behaves the way it would with real data. Handy for smoke
//! tests and for exercising targets without network access.

use async_trait::async_trait;
use futures::stream;
use gleaner_common::DateRange;
use gleaner_core::{EtlError, PluginError, PluginOptions, Record, RecordStream, Source};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_KIND: &str = "downloads";
const DEFAULT_RECORDS_PER_DAY: i64 = 100;
const DEFAULT_PLATFORMS: &[&str] = &["Mac OS X", "Windows 8", "Ubuntu"];

/// Registry constructor for `random`.
pub fn source(options: &PluginOptions) -> Result<Arc<dyn Source>, EtlError> {
    Ok(Arc::new(RandomSource::from_options(options)?))
}

#[derive(Debug)]
pub struct RandomSource {
    id: String,
    kind: String,
    records_per_day: usize,
    platforms: Vec<String>,
}

impl RandomSource {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        let kind = options
            .get_str("kind")?
            .unwrap_or(DEFAULT_KIND)
            .to_string();
        let records_per_day = options
            .get_i64("records_per_day")?
            .unwrap_or(DEFAULT_RECORDS_PER_DAY);
        if records_per_day < 0 {
            return Err(EtlError::config(format!(
                "source '{}': 'records_per_day' must not be negative",
                options.id()
            )));
        }
        let platforms = match options.get_str_list("platforms")? {
            Some(list) if list.is_empty() => {
                return Err(EtlError::config(format!(
                    "source '{}': 'platforms' must not be empty",
                    options.id()
                )));
            },
            Some(list) => list,
            None => DEFAULT_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        };
        Ok(Self {
            id: options.id().to_string(),
            kind,
            records_per_day: records_per_day as usize,
            platforms,
        })
    }

    fn generate(&self, range: DateRange) -> Vec<Record> {
        let mut rng = rand::thread_rng();
        let item_uuids: Vec<String> = (0..self.records_per_day)
            .map(|_| Uuid::new_v4().simple().to_string())
            .collect();
        let mut records = Vec::new();
        for day in range.days() {
            for (ordinal, item_uuid) in item_uuids.iter().enumerate() {
                let platform = self
                    .platforms
                    .choose(&mut rng)
                    .map(String::as_str)
                    .unwrap_or("unknown");
                records.push(
                    Record::new(day, self.kind.as_str())
                        .with_field("os", platform)
                        .with_field("downloads_count", rng.gen_range(1000..=1500i64))
                        .with_field("users_count", rng.gen_range(10000..=15000i64))
                        .with_field("item", (ordinal + 1) as i64)
                        .with_field("item_uuid", item_uuid.as_str()),
                );
            }
        }
        records
    }
}

#[async_trait]
impl Source for RandomSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, range: DateRange) -> Result<RecordStream, PluginError> {
        Ok(Box::pin(stream::iter(
            self.generate(range).into_iter().map(Ok),
        )))
    }
}
