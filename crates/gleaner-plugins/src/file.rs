//! JSON-lines file target
//!
//! `file-write` serializes each record to one JSON line. The file is
//! truncated when the plugin is built, so a forced re-run within the
//! same invocation rewrites it from scratch. Rollback cannot unwrite
//! lines; a failed phase leaves a partial file behind, and the next run
//! replaces it.

use async_trait::async_trait;
use gleaner_core::{EtlError, PluginError, PluginOptions, SourcedRecord, Target};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry constructor for `file-write`.
pub fn target(options: &PluginOptions) -> Result<Arc<dyn Target>, EtlError> {
    Ok(Arc::new(FileTarget::from_options(options)?))
}

#[derive(Debug)]
pub struct FileTarget {
    id: String,
    writer: Mutex<BufWriter<File>>,
}

impl FileTarget {
    pub fn from_options(options: &PluginOptions) -> Result<Self, EtlError> {
        let path = options.require_path("path")?;
        let file = File::create(&path).map_err(|err| {
            EtlError::plugin(
                options.id(),
                format!("cannot create '{}': {}", path.display(), err),
            )
        })?;
        Ok(Self {
            id: options.id().to_string(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl Target for FileTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError> {
        let mut writer = self.writer.lock().await;
        for sourced in batch {
            let line = serde_json::to_string(&sourced.record)?;
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), PluginError> {
        self.writer.lock().await.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use gleaner_core::Record;

    #[tokio::test]
    async fn test_writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let options = PluginOptions::new("dump", "targets.dump", dir.path())
            .with("path", "out.jsonl");
        let target = FileTarget::from_options(&options).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        target
            .inject(&[
                SourcedRecord::new("ga", Record::new(date, "visits").with_field("count", 3)),
                SourcedRecord::new("ga", Record::new(date, "visits").with_field("count", 4)),
            ])
            .await
            .unwrap();
        target.commit_transaction().await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["date"], "2024-05-01");
        assert_eq!(first["kind"], "visits");
        assert_eq!(first["count"], 3);
    }

    #[test]
    fn test_unwritable_path_is_a_constructor_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = PluginOptions::new("dump", "targets.dump", dir.path())
            .with("path", "no/such/dir/out.jsonl");
        let err = FileTarget::from_options(&options).unwrap_err();
        assert!(err.to_string().contains("cannot create"));
    }
}
