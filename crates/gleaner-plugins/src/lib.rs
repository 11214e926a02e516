//! Gleaner Plugin Library
//!
//! Built-in source and target implementations for the pipeline engine.
//!
//! # Built-in Sources
//!
//! - **sql-read**: rows from a SQLite query, one record per row
//! - **rest-read**: a paginated JSON REST endpoint
//! - **random**: synthetic download figures for smoke testing
//!
//! # Built-in Targets
//!
//! - **sql-write**: a transactional SQLite `records` table
//! - **index-write**: an HTTP search index, written via `_bulk`
//! - **file-write**: JSON lines in a local file
//! - **stdout-write**: JSON lines on standard output
//!
//! # Example
//!
//! ```no_run
//! let registry = gleaner_plugins::builtin();
//! assert!(registry.source_selectors().contains(&"rest-read"));
//! assert!(registry.target_selectors().contains(&"sql-write"));
//! ```

use gleaner_core::Registry;

pub mod file;
pub mod index;
pub mod random;
pub mod rest;
pub mod sql;
pub mod stdout;

/// Cap on pooled SQLite connections per plugin instance.
pub(crate) const REQUEST_POOL_SIZE: u32 = 5;

/// Timeout for any single HTTP request a plugin makes.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A registry preloaded with every built-in implementation.
///
/// Embedders who want a different set (or their own plugins) can start
/// from [`Registry::new`] instead and register selectors by hand.
pub fn builtin() -> Registry {
    let mut registry = Registry::new();
    registry.register_source("sql-read", sql::source);
    registry.register_source("rest-read", rest::source);
    registry.register_source("random", random::source);
    registry.register_target("sql-write", sql::target);
    registry.register_target("index-write", index::target);
    registry.register_target("file-write", file::target);
    registry.register_target("stdout-write", stdout::target);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_selector() {
        let registry = builtin();
        assert_eq!(
            registry.source_selectors(),
            vec!["random", "rest-read", "sql-read"]
        );
        assert_eq!(
            registry.target_selectors(),
            vec!["file-write", "index-write", "sql-write", "stdout-write"]
        );
    }
}
