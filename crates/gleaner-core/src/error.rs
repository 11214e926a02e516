//! Error types for the pipeline core
//!
//! Two layers: [`PluginError`] is what source/target implementations
//! return, [`EtlError`] is what the engine and its collaborators surface
//! to the binary. Task failures inside a phase are captured as
//! [`TaskFailure`] values and aggregated into [`EtlError::Run`] rather
//! than raised one at a time.

use gleaner_common::DateRange;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Which side of the pipeline a failed task was working
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Extract,
    Inject,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Extract => write!(f, "extract"),
            TaskKind::Inject => write!(f, "inject"),
        }
    }
}

/// A single failed extraction or injection task, captured during a phase
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub kind: TaskKind,
    pub plugin_id: String,
    pub detail: String,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in '{}'. error: {}", self.kind, self.plugin_id, self.detail)
    }
}

fn format_failures(failures: &[TaskFailure]) -> String {
    let mut out = format!("{} failures\n\n", failures.len());
    for (i, failure) in failures.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, failure));
    }
    out
}

/// Errors surfaced by the engine, ledger, sequence and configuration
#[derive(Error, Debug)]
pub enum EtlError {
    /// The idempotency gate found the work already recorded. Terminal:
    /// never retried, and the run stops before any I/O for the phase.
    #[error("source '{source_id}' already processed for {range}. Re-run with --force to clear and reprocess.")]
    AlreadyDone { source_id: String, range: DateRange },

    /// Aggregate of every task failure observed during one phase.
    #[error("{}", format_failures(.0))]
    Run(Vec<TaskFailure>),

    /// A remote collaborator reported a server-side failure.
    #[error("upstream server error: {0}")]
    Server(String),

    /// Configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read config file '{path}': {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// The shared queue held leftovers at phase start.
    #[error("the shared queue still held {0} items at phase start")]
    QueueResidue(usize),

    /// Transaction bookkeeping violation (e.g. starting twice).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Ledger storage failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    /// A plugin failed outside the extract/inject task loop
    /// (transaction verbs, construction).
    #[error("plugin '{plugin_id}': {message}")]
    Plugin { plugin_id: String, message: String },

    #[error(transparent)]
    DateRange(#[from] gleaner_common::DateRangeError),
}

impl EtlError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a plugin error carrying the plugin's id
    pub fn plugin(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by source and target implementations
///
/// The engine folds these into [`TaskFailure`]s; it only inspects the
/// variant to distinguish upstream (5xx-style) failures from everything
/// else.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The remote service failed on its side (retriable).
    #[error("upstream server error: {0}")]
    Server(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl PluginError {
    /// Create a server-side error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Create a generic plugin error
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}
