//! Gleaner Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the gleaner workspace members:
//!
//! - **Dates**: inclusive date ranges and the symbolic range words the CLI
//!   accepts (`today`, `yesterday`, `last-week`, ...)
//! - **Logging**: tracing subscriber setup (console or rotated file, text
//!   or JSON)

pub mod dates;
pub mod logging;

// Re-export commonly used types
pub use dates::{DateRange, DateRangeError, RangeWord};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
