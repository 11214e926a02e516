//! Phase assembly
//!
//! A [`Sequence`] is the ordered list of phases a run executes. Building
//! it resolves every referenced plugin section through the registry,
//! eagerly, so configuration mistakes surface before any extraction
//! starts. Plugin instances are memoized by section name: a target
//! shared by three phases is one instance, holding one transaction.

use crate::config::{PipelineConfig, PluginOptions};
use crate::error::EtlError;
use crate::plugin::{Source, Target};
use crate::registry::Registry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One pipeline step: a set of sources fanned out to a set of targets
#[derive(Clone, Debug)]
pub struct Phase {
    pub name: String,
    pub sources: Vec<Arc<dyn Source>>,
    pub targets: Vec<Arc<dyn Target>>,
}

/// Ordered phases with their resolved plugin instances
#[derive(Debug)]
pub struct Sequence {
    phases: Vec<Phase>,
}

impl Sequence {
    /// Assemble a sequence from already-constructed phases. Callers
    /// embedding the engine can skip the config layer entirely.
    pub fn from_phases(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Build the full sequence named by `[gleaner] sequence`.
    pub fn build(config: &PipelineConfig, registry: &Registry) -> Result<Self, EtlError> {
        Self::build_subset(config, registry, &config.gleaner.sequence)
    }

    /// Build only the given phases, in the given order (the CLI's
    /// `--phases` selector).
    pub fn build_subset(
        config: &PipelineConfig,
        registry: &Registry,
        phase_names: &[String],
    ) -> Result<Self, EtlError> {
        let mut cache = PluginCache {
            config,
            registry,
            sources: HashMap::new(),
            targets: HashMap::new(),
        };

        let mut phases = Vec::with_capacity(phase_names.len());
        for name in phase_names {
            let spec = config.phases.get(name).ok_or_else(|| {
                EtlError::config(format!("no [phases.{}] section for phase '{}'", name, name))
            })?;

            let mut sources = Vec::with_capacity(spec.sources.len());
            for source_name in &spec.sources {
                sources.push(cache.source(source_name)?);
            }

            let mut targets = Vec::with_capacity(spec.targets.len());
            for target_name in &spec.targets {
                targets.push(cache.target(target_name)?);
            }

            phases.push(Phase {
                name: name.clone(),
                sources,
                targets,
            });
        }

        Ok(Self { phases })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Every source, once, in order of first appearance.
    pub fn distinct_sources(&self) -> Vec<Arc<dyn Source>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for phase in &self.phases {
            for source in &phase.sources {
                if seen.insert(source.id().to_string()) {
                    out.push(Arc::clone(source));
                }
            }
        }
        out
    }

    /// Every target, once, in order of first appearance.
    pub fn distinct_targets(&self) -> Vec<Arc<dyn Target>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for phase in &self.phases {
            for target in &phase.targets {
                if seen.insert(target.id().to_string()) {
                    out.push(Arc::clone(target));
                }
            }
        }
        out
    }

    /// Ids of every distinct source in the sequence.
    pub fn source_ids(&self) -> Vec<String> {
        self.distinct_sources()
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }
}

/// Memoizes plugin instances by section name during a build
struct PluginCache<'a> {
    config: &'a PipelineConfig,
    registry: &'a Registry,
    sources: HashMap<String, Arc<dyn Source>>,
    targets: HashMap<String, Arc<dyn Target>>,
}

impl PluginCache<'_> {
    fn source(&mut self, name: &str) -> Result<Arc<dyn Source>, EtlError> {
        if let Some(existing) = self.sources.get(name) {
            return Ok(Arc::clone(existing));
        }
        let spec = self.config.sources.get(name).ok_or_else(|| {
            EtlError::config(format!("no [sources.{}] section for source '{}'", name, name))
        })?;
        let selector = spec.implementation.as_deref().ok_or_else(|| {
            EtlError::config(format!("[sources.{}] is missing the 'use' selector", name))
        })?;
        let options = PluginOptions::from_spec("sources", name, spec, self.config.base_dir());
        let instance = self.registry.build_source(selector, &options)?;
        self.sources.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }

    fn target(&mut self, name: &str) -> Result<Arc<dyn Target>, EtlError> {
        if let Some(existing) = self.targets.get(name) {
            return Ok(Arc::clone(existing));
        }
        let spec = self.config.targets.get(name).ok_or_else(|| {
            EtlError::config(format!("no [targets.{}] section for target '{}'", name, name))
        })?;
        let selector = spec.implementation.as_deref().ok_or_else(|| {
            EtlError::config(format!("[targets.{}] is missing the 'use' selector", name))
        })?;
        let options = PluginOptions::from_spec("targets", name, spec, self.config.base_dir());
        let instance = self.registry.build_target(selector, &options)?;
        self.targets.insert(name.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}
