//! In-memory Source and Target fixtures for engine integration tests
//!
//! `VecSource` serves a canned record list and counts calls;
//! `MemTarget` buffers batches with real stage/commit/rollback so tests
//! can tell apart what a phase staged from what it actually kept.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream;
use gleaner_common::DateRange;
use gleaner_core::{
    History, Phase, PluginError, Record, RecordStream, Source, SourcedRecord, Target,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A source serving a fixed set of records
pub struct VecSource {
    id: String,
    records: Vec<Record>,
    /// Yield an error after this many records (None = never fail)
    fail_after: Option<usize>,
    fail_purge: bool,
    extract_calls: AtomicUsize,
    purge_calls: AtomicUsize,
}

impl VecSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: Vec::new(),
            fail_after: None,
            fail_purge: false,
            extract_calls: AtomicUsize::new(0),
            purge_calls: AtomicUsize::new(0),
        }
    }

    /// Add `count` records of the given kind, all dated `date`, each
    /// carrying its ordinal in an `n` field.
    pub fn with_records(mut self, count: usize, date: NaiveDate, kind: &str) -> Self {
        for n in 0..count {
            self.records
                .push(Record::new(date, kind).with_field("n", n as i64));
        }
        self
    }

    /// Make the stream fail after yielding this many records.
    pub fn failing_after(mut self, records: usize) -> Self {
        self.fail_after = Some(records);
        self
    }

    pub fn with_failing_purge(mut self) -> Self {
        self.fail_purge = true;
        self
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn purge_calls(&self) -> usize {
        self.purge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for VecSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(&self, _range: DateRange) -> Result<RecordStream, PluginError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let mut items: Vec<Result<Record, PluginError>> =
            self.records.iter().cloned().map(Ok).collect();
        if let Some(after) = self.fail_after {
            items.truncate(after);
            items.push(Err(PluginError::message("source went away")));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    async fn purge(&self, _range: DateRange) -> Result<(), PluginError> {
        self.purge_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_purge {
            return Err(PluginError::message("purge endpoint is gone"));
        }
        Ok(())
    }
}

/// A target buffering batches in memory with real transaction verbs
pub struct MemTarget {
    id: String,
    staged: Mutex<Vec<SourcedRecord>>,
    committed: Mutex<Vec<SourcedRecord>>,
    batch_sizes: Mutex<Vec<usize>>,
    /// Reject this many inject calls before accepting any
    fail_injects: AtomicUsize,
    clear_calls: Mutex<Vec<Vec<String>>>,
}

impl MemTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            staged: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            fail_injects: AtomicUsize::new(0),
            clear_calls: Mutex::new(Vec::new()),
        }
    }

    /// Make the first `injects` inject calls fail.
    pub fn failing_first(self, injects: usize) -> Self {
        self.fail_injects.store(injects, Ordering::SeqCst);
        self
    }

    pub fn committed(&self) -> Vec<SourcedRecord> {
        self.committed.lock().expect("committed lock").clone()
    }

    pub fn committed_for(&self, source_id: &str) -> usize {
        self.committed()
            .iter()
            .filter(|sourced| sourced.source_id == source_id)
            .count()
    }

    pub fn staged_len(&self) -> usize {
        self.staged.lock().expect("staged lock").len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().expect("batch_sizes lock").clone()
    }

    pub fn clear_calls(&self) -> Vec<Vec<String>> {
        self.clear_calls.lock().expect("clear_calls lock").clone()
    }
}

#[async_trait]
impl Target for MemTarget {
    fn id(&self) -> &str {
        &self.id
    }

    async fn inject(&self, batch: &[SourcedRecord]) -> Result<(), PluginError> {
        if self.fail_injects.load(Ordering::SeqCst) > 0 {
            self.fail_injects.fetch_sub(1, Ordering::SeqCst);
            return Err(PluginError::message("store rejected the batch"));
        }
        self.batch_sizes
            .lock()
            .expect("batch_sizes lock")
            .push(batch.len());
        self.staged
            .lock()
            .expect("staged lock")
            .extend_from_slice(batch);
        Ok(())
    }

    async fn clear(&self, range: DateRange, source_ids: &[String]) -> Result<u64, PluginError> {
        self.clear_calls
            .lock()
            .expect("clear_calls lock")
            .push(source_ids.to_vec());
        let mut committed = self.committed.lock().expect("committed lock");
        let before = committed.len();
        committed.retain(|sourced| {
            !(source_ids.contains(&sourced.source_id) && range.contains(sourced.record.date))
        });
        Ok((before - committed.len()) as u64)
    }

    async fn start_transaction(&self) -> Result<(), PluginError> {
        self.staged.lock().expect("staged lock").clear();
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), PluginError> {
        let mut staged = self.staged.lock().expect("staged lock");
        self.committed
            .lock()
            .expect("committed lock")
            .append(&mut staged);
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), PluginError> {
        self.staged.lock().expect("staged lock").clear();
        Ok(())
    }
}

/// Open a fresh ledger inside the given temp dir.
pub async fn mem_history(dir: &tempfile::TempDir) -> History {
    let url = format!("sqlite://{}", dir.path().join("history.db").display());
    History::open(&url)
        .await
        .expect("Failed to open history ledger")
}

pub fn may(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, day).expect("valid date")
}

pub fn phase(name: &str, sources: Vec<Arc<dyn Source>>, targets: Vec<Arc<dyn Target>>) -> Phase {
    Phase {
        name: name.to_string(),
        sources,
        targets,
    }
}
