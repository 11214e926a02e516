//! Record types moved through the pipeline
//!
//! A [`Record`] is what a source produces: a logical date, a type tag,
//! and a flat payload of JSON scalars. The engine wraps each one with
//! the id of the source that produced it before queueing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form scalar fields carried alongside the structural ones
pub type Payload = serde_json::Map<String, Value>;

/// One unit of extracted data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Logical date the data belongs to (not the extraction time)
    pub date: NaiveDate,

    /// Type/category tag, e.g. "visits" or "downloads"
    pub kind: String,

    /// Remaining fields, flattened on (de)serialization
    #[serde(flatten)]
    pub payload: Payload,
}

impl Record {
    pub fn new(date: NaiveDate, kind: impl Into<String>) -> Self {
        Self {
            date,
            kind: kind.into(),
            payload: Payload::new(),
        }
    }

    /// Add a payload field, builder style.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// A record tagged with the id of the source that produced it
///
/// Targets receive these in batches; the source id is part of the
/// persisted row so forced re-runs can clear exactly the right data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcedRecord {
    pub source_id: String,
    #[serde(flatten)]
    pub record: Record,
}

impl SourcedRecord {
    pub fn new(source_id: impl Into<String>, record: Record) -> Self {
        Self {
            source_id: source_id.into(),
            record,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_flat() {
        let record = Record::new(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            "visits",
        )
        .with_field("count", 42)
        .with_field("platform", "web");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["date"], "2024-05-01");
        assert_eq!(json["kind"], "visits");
        assert_eq!(json["count"], 42);
        assert_eq!(json["platform"], "web");
    }

    #[test]
    fn test_record_roundtrip_keeps_payload() {
        let json = r#"{"date":"2024-05-01","kind":"sales","amount":9.5}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind, "sales");
        assert_eq!(record.payload["amount"], 9.5);
    }

    #[test]
    fn test_sourced_record_serializes_flat_with_source_id() {
        let sourced = SourcedRecord::new(
            "ga",
            Record::new(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), "visits")
                .with_field("count", 7),
        );
        let json = serde_json::to_value(&sourced).unwrap();
        assert_eq!(json["source_id"], "ga");
        assert_eq!(json["date"], "2024-05-02");
        assert_eq!(json["count"], 7);
    }
}
