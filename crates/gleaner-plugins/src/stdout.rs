//! Standard-output target
//!
//! `stdout-write` prints each record as one JSON line, source id
//! included, which makes it useful for piping a run into `jq` or for
//! eyeballing what a source actually produces. There is nothing to roll
//! back; lines already printed stay printed.

use async_trait::async_trait;
use gleaner_core::{EtlError, PluginError, PluginOptions, SourcedRecord, Target};
use std::io::Write;
use std::sync::Arc;

/// Registry constructor for `stdout-write`.
pub fn target(options: &PluginOptions) -> Result<Arc<dyn Target>, EtlError> {
    Ok(Arc::new(StdoutTarget {
        id: options.id().to_string(),
    }))
}

pub struct StdoutTarget {
    id: String,
}

#[async_trait]
impl Target for StdoutTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for sourced in batch {
            let line = serde_json::to_string(sourced)?;
            writeln!(handle, "{}", line)?;
        }
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), PluginError> {
        std::io::stdout().flush()?;
        Ok(())
    }
}
