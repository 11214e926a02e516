//! Gleaner Core Library
//!
//! The pipeline model and execution engine behind the `gleaner` binary.
//!
//! # Pipeline Model
//!
//! - **Sources** stream dated records for a date range
//! - **Targets** receive records in batches inside loose transactions
//! - **Phases** pair sources with targets; a **Sequence** orders them
//! - The **History** ledger makes completed (source, day) work skippable
//!
//! # Example
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use gleaner_common::DateRange;
//! use gleaner_core::{Engine, EngineSettings, History, PipelineConfig, Registry, Sequence};
//!
//! # async fn run(registry: Registry) -> Result<(), gleaner_core::EtlError> {
//! let config = PipelineConfig::load("gleaner.toml")?;
//! let sequence = Sequence::build(&config, &registry)?;
//! let history = History::open(&config.history_url()).await?;
//!
//! let mut engine = Engine::new(sequence, history, EngineSettings::default());
//! let range = DateRange::single(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
//! engine.run(range, false, false).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod plugin;
pub mod record;
pub mod registry;
pub mod sequence;

pub use config::{PipelineConfig, PluginOptions, PluginSpec};
pub use engine::{Engine, EngineSettings};
pub use error::{EtlError, PluginError, Result, TaskFailure, TaskKind};
pub use history::History;
pub use plugin::{RecordStream, Source, Target};
pub use record::{Payload, Record, SourcedRecord};
pub use registry::Registry;
pub use sequence::{Phase, Sequence};
