//! Source and Target capability traits
//!
//! These are the seams the engine drives. Implementations live in the
//! plugins crate (and in test fixtures); the engine only ever sees
//! `Arc<dyn Source>` / `Arc<dyn Target>`.

use crate::error::PluginError;
use crate::record::{Record, SourcedRecord};
use async_trait::async_trait;
use futures::stream::BoxStream;
use gleaner_common::DateRange;

/// Lazy stream of extracted records
///
/// The stream owns whatever it needs (client handles, cursors); it must
/// not borrow the source it came from, because the engine consumes it on
/// a spawned task.
pub type RecordStream = BoxStream<'static, Result<Record, PluginError>>;

/// A producer of records for a date range
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable identity, used in the ledger and in target rows.
    fn id(&self) -> &str;

    /// Open a record stream for the given range. Errors opening the
    /// stream and errors yielded by it are both recorded as extraction
    /// failures for this source.
    async fn extract(&self, range: DateRange) -> Result<RecordStream, PluginError>;

    /// Drop upstream staging data for the range, where the backing
    /// service supports it. Best effort: the engine logs and continues
    /// on failure.
    async fn purge(&self, _range: DateRange) -> Result<(), PluginError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("id", &self.id()).finish()
    }
}

/// A consumer of record batches
///
/// Transaction verbs default to no-ops for stores without transactions;
/// such stores rely on [`Target::clear`] for retry-safety instead.
#[async_trait]
pub trait Target: Send + Sync {
    /// Stable identity, used in failure reports.
    fn id(&self) -> &str;

    /// Write one batch. Every target of a phase receives every batch.
    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError>;

    /// Remove previously committed records for the given sources and
    /// range, returning how many went away.
    async fn clear(&self, _range: DateRange, _source_ids: &[String]) -> Result<u64, PluginError> {
        Ok(0)
    }

    async fn start_transaction(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("id", &self.id()).finish()
    }
}
