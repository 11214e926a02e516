//! Static plugin registry
//!
//! Implementation selectors (the `use` option of a plugin section) map
//! to plain constructor functions registered at startup. Everything is
//! resolved while the sequence is built, so an unknown selector fails
//! before any I/O happens.

use crate::config::PluginOptions;
use crate::error::EtlError;
use crate::plugin::{Source, Target};
use std::collections::HashMap;
use std::sync::Arc;

/// Constructor for a source implementation
pub type SourceCtor = fn(&PluginOptions) -> Result<Arc<dyn Source>, EtlError>;

/// Constructor for a target implementation
pub type TargetCtor = fn(&PluginOptions) -> Result<Arc<dyn Target>, EtlError>;

/// Selector-to-constructor tables for both plugin kinds
#[derive(Default)]
pub struct Registry {
    sources: HashMap<String, SourceCtor>,
    targets: HashMap<String, TargetCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, selector: impl Into<String>, ctor: SourceCtor) {
        self.sources.insert(selector.into(), ctor);
    }

    pub fn register_target(&mut self, selector: impl Into<String>, ctor: TargetCtor) {
        self.targets.insert(selector.into(), ctor);
    }

    /// Instantiate a source through its registered constructor.
    pub fn build_source(
        &self,
        selector: &str,
        options: &PluginOptions,
    ) -> Result<Arc<dyn Source>, EtlError> {
        match self.sources.get(selector) {
            Some(ctor) => ctor(options),
            None => Err(self.unknown(selector, "source", &self.source_selectors())),
        }
    }

    /// Instantiate a target through its registered constructor.
    pub fn build_target(
        &self,
        selector: &str,
        options: &PluginOptions,
    ) -> Result<Arc<dyn Target>, EtlError> {
        match self.targets.get(selector) {
            Some(ctor) => ctor(options),
            None => Err(self.unknown(selector, "target", &self.target_selectors())),
        }
    }

    pub fn source_selectors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn target_selectors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn unknown(&self, selector: &str, kind: &str, known: &[&str]) -> EtlError {
        EtlError::config(format!(
            "no {} implementation registered for '{}' (known: {})",
            kind,
            selector,
            known.join(", ")
        ))
    }
}
