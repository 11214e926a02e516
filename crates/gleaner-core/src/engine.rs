//! Phase execution engine
//!
//! Drives each phase of a sequence over one date range: gate on the
//! ledger, stream records from every source of the phase into a shared
//! queue, move them in bounded batches to every target, then commit the
//! targets and the ledger (each participant on its own, targets first).
//!
//! Concurrency shape: one task per source pushes into an unbounded MPSC
//! queue and ends with a sentinel; the engine is the single consumer,
//! collecting batches and fanning each one out to all targets before
//! collecting the next. There is no cross-store atomicity. Recovery is
//! retry, plus forced clear-and-rerun for ranges that half-landed.

use crate::error::{EtlError, PluginError, TaskFailure, TaskKind};
use crate::history::History;
use crate::plugin::Source;
use crate::record::SourcedRecord;
use crate::sequence::{Phase, Sequence};
use futures::StreamExt;
use gleaner_common::DateRange;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Tunables for a run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Records per fan-out batch
    pub batch_size: usize,

    /// Attempts per step (clear, each phase, purge)
    pub retries: u32,

    /// Cap on each remote pull and inject call
    pub op_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            retries: 3,
            op_timeout: Duration::from_secs(300),
        }
    }
}

/// What extraction tasks push into the shared queue
enum QueueItem {
    Record(SourcedRecord),
    /// Per-producer end-of-stream sentinel, pushed exactly once per
    /// extraction task, success or failure.
    Eos,
}

/// The retryable steps of a run
#[derive(Clone, Copy)]
enum Step<'a> {
    Clear,
    Phase(&'a Phase),
    Purge,
}

impl std::fmt::Display for Step<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Clear => write!(f, "clear"),
            Step::Phase(phase) => write!(f, "phase {}", phase.name),
            Step::Purge => write!(f, "purge"),
        }
    }
}

/// Runs a sequence's phases over a date range
pub struct Engine {
    sequence: Sequence,
    history: History,
    settings: EngineSettings,
    queue_tx: UnboundedSender<QueueItem>,
    queue_rx: UnboundedReceiver<QueueItem>,
    errors: Arc<Mutex<Vec<TaskFailure>>>,
}

impl Engine {
    pub fn new(sequence: Sequence, history: History, settings: EngineSettings) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            sequence,
            history,
            settings,
            queue_tx,
            queue_rx,
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Execute the run: optional forced clear, each phase in order,
    /// then the best-effort purge pass.
    pub async fn run(
        &mut self,
        range: DateRange,
        force: bool,
        purge_only: bool,
    ) -> Result<(), EtlError> {
        info!(range = %range, force, purge_only, "Starting pipeline run");
        self.errors.lock().await.clear();

        if !purge_only {
            if force {
                self.with_retries(Step::Clear, range, force).await?;
            }

            let phases = self.sequence.phases().to_vec();
            for phase in &phases {
                let pending = self.queue_rx.len();
                if pending > 0 {
                    return Err(EtlError::QueueResidue(pending));
                }
                self.with_retries(Step::Phase(phase), range, force).await?;
            }
        }

        self.with_retries(Step::Purge, range, force).await?;
        info!(range = %range, "Pipeline run complete");
        Ok(())
    }

    /// Run one step up to `retries` times. The queue is drained before
    /// every attempt so a half-consumed batch from a failed attempt is
    /// never replayed. An idempotency conflict is terminal.
    async fn with_retries(
        &mut self,
        step: Step<'_>,
        range: DateRange,
        force: bool,
    ) -> Result<(), EtlError> {
        let attempts = self.settings.retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.drain_queue();
            let result = match step {
                Step::Clear => self.clear_targets(range).await,
                Step::Phase(phase) => self.run_phase(phase, range, force).await,
                Step::Purge => self.purge_sources(range).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err @ EtlError::AlreadyDone { .. }) => return Err(err),
                Err(err) if attempt < attempts => {
                    error!(
                        step = %step,
                        attempt,
                        retries = attempts,
                        error = %err,
                        "Step failed, retrying"
                    );
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Discard whatever a previous attempt left behind.
    fn drain_queue(&mut self) {
        let mut drained = 0usize;
        while self.queue_rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Discarded stale queue items");
        }
    }

    /// Forced-run preamble: drop every target's committed records for
    /// every source id in the sequence. Per-target failures are logged
    /// and skipped; the re-extract still overwrites what it can.
    async fn clear_targets(&self, range: DateRange) -> Result<(), EtlError> {
        let source_ids = self.sequence.source_ids();
        for target in self.sequence.distinct_targets() {
            match target.clear(range, &source_ids).await {
                Ok(removed) => {
                    info!(target = target.id(), removed, "Cleared prior records");
                },
                Err(err) => {
                    error!(target = target.id(), error = %err, "Failed to clear target, continuing");
                },
            }
        }
        Ok(())
    }

    /// Best-effort upstream cleanup, independent of targets and of the
    /// ledger. Per-source failures are logged and skipped.
    async fn purge_sources(&self, range: DateRange) -> Result<(), EtlError> {
        for source in self.sequence.distinct_sources() {
            debug!(source = source.id(), "Purging source");
            if let Err(err) = source.purge(range).await {
                error!(source = source.id(), error = %err, "Failed to purge source, continuing");
            }
        }
        Ok(())
    }

    async fn run_phase(
        &mut self,
        phase: &Phase,
        range: DateRange,
        force: bool,
    ) -> Result<(), EtlError> {
        info!(
            phase = %phase.name,
            sources = phase.sources.len(),
            targets = phase.targets.len(),
            range = %range,
            "Running phase"
        );

        // Idempotency gate, before any transaction or I/O.
        if !force {
            for source in &phase.sources {
                if self.history.exists(source.id(), range).await? {
                    return Err(EtlError::AlreadyDone {
                        source_id: source.id().to_string(),
                        range,
                    });
                }
            }
        }

        match self.extract_and_inject(phase, range).await {
            Ok(pushed) => {
                // Data first, bookkeeping last.
                for target in &phase.targets {
                    target.commit_transaction().await.map_err(|err| {
                        EtlError::plugin(target.id(), format!("commit failed: {}", err))
                    })?;
                }
                self.history.commit_transaction().await?;
                info!(phase = %phase.name, records = pushed, "Phase committed");
                Ok(())
            },
            Err(err) => {
                self.rollback_phase(phase).await;
                Err(err)
            },
        }
    }

    /// The transactional middle of a phase: open every participant,
    /// stream all sources through the queue into batched fan-out
    /// injections, then record the ledger entries (still uncommitted).
    /// Returns how many records were dispatched.
    async fn extract_and_inject(
        &mut self,
        phase: &Phase,
        range: DateRange,
    ) -> Result<u64, EtlError> {
        self.errors.lock().await.clear();

        // Targets first, ledger last.
        for target in &phase.targets {
            target.start_transaction().await.map_err(|err| {
                EtlError::plugin(target.id(), format!("start transaction failed: {}", err))
            })?;
        }
        self.history.start_transaction().await?;

        let mut active = 0usize;
        for source in &phase.sources {
            let task_source = Arc::clone(source);
            let queue = self.queue_tx.clone();
            let errors = Arc::clone(&self.errors);
            let op_timeout = self.settings.op_timeout;
            // Detached on purpose: a failing attempt waits for each
            // producer's sentinel instead of aborting it mid-push.
            tokio::spawn(extract_source(task_source, range, queue, errors, op_timeout));
            active += 1;
        }

        let mut pushed: u64 = 0;
        while active > 0 || !self.queue_rx.is_empty() {
            let batch = self.collect_batch(&mut active).await;
            if batch.is_empty() {
                continue;
            }
            if self.errors.lock().await.is_empty() {
                pushed += batch.len() as u64;
                self.inject_batch(phase, batch).await;
            }
            // After a failure the loop keeps consuming sentinels so the
            // queue is empty when the phase exits.
        }

        let failures = std::mem::take(&mut *self.errors.lock().await);
        if !failures.is_empty() {
            return Err(EtlError::Run(failures));
        }

        let source_ids: Vec<&str> = phase.sources.iter().map(|s| s.id()).collect();
        self.history.add_entry(&source_ids, range).await?;
        Ok(pushed)
    }

    /// Collect up to one batch from the queue
    ///
    /// A batch closes at `batch_size`, at a producer's end-of-stream
    /// sentinel, or when the queue runs dry with no producers left.
    async fn collect_batch(&mut self, active: &mut usize) -> Vec<SourcedRecord> {
        let cap = self.settings.batch_size.max(1);
        let mut batch = Vec::new();
        while batch.len() < cap {
            let item = if *active > 0 {
                match self.queue_rx.recv().await {
                    Some(item) => item,
                    None => break,
                }
            } else {
                match self.queue_rx.try_recv() {
                    Ok(item) => item,
                    Err(_) => break,
                }
            };
            match item {
                QueueItem::Record(record) => batch.push(record),
                QueueItem::Eos => {
                    *active = active.saturating_sub(1);
                    break;
                },
            }
        }
        batch
    }

    /// Fan one batch out to every target of the phase and wait for all
    /// of them before the next batch is collected.
    async fn inject_batch(&self, phase: &Phase, batch: Vec<SourcedRecord>) {
        debug!(phase = %phase.name, records = batch.len(), "Dispatching batch");
        let batch = Arc::new(batch);
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::with_capacity(phase.targets.len());

        for target in &phase.targets {
            let task_target = Arc::clone(target);
            let task_batch = Arc::clone(&batch);
            let errors = Arc::clone(&self.errors);
            let op_timeout = self.settings.op_timeout;
            let handle = tokio::spawn(async move {
                let outcome = match timeout(op_timeout, task_target.inject(&task_batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(timeout_error("inject", op_timeout)),
                };
                if let Err(err) = outcome {
                    errors.lock().await.push(TaskFailure {
                        kind: TaskKind::Inject,
                        plugin_id: task_target.id().to_string(),
                        detail: err.to_string(),
                    });
                }
            });
            handles.push((target.id().to_string(), handle));
        }

        for (target_id, handle) in handles {
            if let Err(err) = handle.await {
                self.errors.lock().await.push(TaskFailure {
                    kind: TaskKind::Inject,
                    plugin_id: target_id,
                    detail: format!("task aborted: {}", err),
                });
            }
        }
    }

    /// Roll back every participant, logging rather than raising so the
    /// original failure is what propagates.
    async fn rollback_phase(&self, phase: &Phase) {
        for target in &phase.targets {
            if let Err(err) = target.rollback_transaction().await {
                error!(target = target.id(), error = %err, "Rollback failed");
            }
        }
        if let Err(err) = self.history.rollback_transaction().await {
            error!(error = %err, "Ledger rollback failed");
        }
    }
}

/// One extraction task: pump the source's stream into the queue, then
/// always push the sentinel, success or failure.
async fn extract_source(
    source: Arc<dyn Source>,
    range: DateRange,
    queue: UnboundedSender<QueueItem>,
    errors: Arc<Mutex<Vec<TaskFailure>>>,
    op_timeout: Duration,
) {
    if let Err(err) = pump_source(&*source, range, &queue, op_timeout).await {
        errors.lock().await.push(TaskFailure {
            kind: TaskKind::Extract,
            plugin_id: source.id().to_string(),
            detail: err.to_string(),
        });
    }
    let _ = queue.send(QueueItem::Eos);
}

async fn pump_source(
    source: &dyn Source,
    range: DateRange,
    queue: &UnboundedSender<QueueItem>,
    op_timeout: Duration,
) -> Result<(), PluginError> {
    let mut stream = timeout(op_timeout, source.extract(range))
        .await
        .map_err(|_| timeout_error("extract", op_timeout))??;

    loop {
        let next = timeout(op_timeout, stream.next())
            .await
            .map_err(|_| timeout_error("next record", op_timeout))?;
        match next {
            Some(Ok(record)) => {
                let item = QueueItem::Record(SourcedRecord::new(source.id(), record));
                if queue.send(item).is_err() {
                    // Receiver gone: the engine was dropped mid-run.
                    break;
                }
            },
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }
    Ok(())
}

fn timeout_error(what: &str, after: Duration) -> PluginError {
    PluginError::message(format!("{} timed out after {}s", what, after.as_secs()))
}
