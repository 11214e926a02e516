//! Pipeline configuration
//!
//! A single TOML file describes a pipeline: one `[gleaner]` settings
//! table, free-form `[sources.*]` / `[targets.*]` plugin sections, and
//! `[phases.*]` tables wiring them together.
//!
//! ```toml
//! [gleaner]
//! sequence = ["visits"]
//! history = "sqlite://gleaner-history.db"
//! batch_size = 100
//!
//! [sources.ga]
//! use = "rest-read"
//! endpoint = "https://analytics.internal/api/v1/visits"
//! kind = "visits"
//!
//! [targets.warehouse]
//! use = "sql-write"
//! database = "sqlite://warehouse.db"
//!
//! [phases.visits]
//! sources = ["ga"]
//! targets = ["warehouse"]
//! ```
//!
//! Plugin sections carry arbitrary keys besides the `use` selector;
//! they reach the plugin constructor through [`PluginOptions`], which
//! resolves relative filesystem paths against the config file's
//! directory.

use crate::error::EtlError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_batch_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    300
}

/// Top-level `[gleaner]` settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Ordered phase names to run
    pub sequence: Vec<String>,

    /// Records per fan-out batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ledger database URL, e.g. "sqlite://gleaner-history.db"
    pub history: String,

    /// Timeout applied to each remote pull and inject call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// A `[sources.*]` or `[targets.*]` section
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSpec {
    /// Implementation selector, resolved through the registry.
    /// Optional at parse time so the sequence builder can report its
    /// absence with the section name attached.
    #[serde(rename = "use")]
    pub implementation: Option<String>,

    /// Everything else in the section, handed to the constructor
    #[serde(flatten)]
    pub options: BTreeMap<String, toml::Value>,
}

/// A `[phases.*]` section
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseSpec {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
}

/// The whole parsed pipeline file
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub gleaner: Settings,

    #[serde(default)]
    pub sources: BTreeMap<String, PluginSpec>,

    #[serde(default)]
    pub targets: BTreeMap<String, PluginSpec>,

    #[serde(default)]
    pub phases: BTreeMap<String, PhaseSpec>,

    /// Directory of the config file, for resolving relative paths
    #[serde(skip)]
    base_dir: PathBuf,
}

impl PipelineConfig {
    /// Load and validate a pipeline file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EtlError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| EtlError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&text, base_dir, &path.display().to_string())
    }

    /// Parse from an in-memory string (used by `load` and by tests).
    pub fn parse(text: &str, base_dir: PathBuf, origin: &str) -> Result<Self, EtlError> {
        let mut config: PipelineConfig =
            toml::from_str(text).map_err(|source| EtlError::ConfigParse {
                path: origin.to_string(),
                source,
            })?;
        config.base_dir = base_dir;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), EtlError> {
        if self.gleaner.sequence.is_empty() {
            return Err(EtlError::config(
                "[gleaner] sequence must name at least one phase",
            ));
        }
        if self.gleaner.batch_size == 0 {
            return Err(EtlError::config("[gleaner] batch_size must be at least 1"));
        }
        if self.gleaner.history.trim().is_empty() {
            return Err(EtlError::config(
                "[gleaner] history must point at the ledger database",
            ));
        }
        if self.gleaner.timeout_secs == 0 {
            return Err(EtlError::config("[gleaner] timeout_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ledger URL with a relative sqlite path resolved against the
    /// config directory.
    pub fn history_url(&self) -> String {
        resolve_database_url(&self.gleaner.history, &self.base_dir)
    }
}

/// Resolve a relative `sqlite:` URL against `base_dir`
///
/// Absolute paths, `:memory:` databases and non-sqlite URLs pass
/// through untouched.
pub fn resolve_database_url(url: &str, base_dir: &Path) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    let path = rest.trim_start_matches("//");
    if path.is_empty() || path.starts_with(':') || path.starts_with('/') {
        return url.to_string();
    }
    format!("sqlite://{}", base_dir.join(path).display())
}

/// Typed accessor over one plugin section's free-form options
///
/// Getter errors name the section and key so a typo in the file is
/// reported as e.g. `[sources.ga] option 'endpoint' must be a string`.
#[derive(Debug, Clone)]
pub struct PluginOptions {
    id: String,
    section: String,
    base_dir: PathBuf,
    values: BTreeMap<String, toml::Value>,
}

impl PluginOptions {
    pub fn new(
        id: impl Into<String>,
        section: impl Into<String>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            section: section.into(),
            base_dir: base_dir.into(),
            values: BTreeMap::new(),
        }
    }

    /// Build from a parsed config section.
    pub fn from_spec(kind: &str, name: &str, spec: &PluginSpec, base_dir: &Path) -> Self {
        Self {
            id: name.to_string(),
            section: format!("{}.{}", kind, name),
            base_dir: base_dir.to_path_buf(),
            values: spec.options.clone(),
        }
    }

    /// Add an option, builder style (mostly for tests).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The plugin's id: its config section name.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn require_str(&self, key: &str) -> Result<&str, EtlError> {
        match self.values.get(key) {
            Some(value) => value.as_str().ok_or_else(|| self.type_error(key, "a string")),
            None => Err(EtlError::config(format!(
                "[{}] missing required option '{}'",
                self.section, key
            ))),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>, EtlError> {
        match self.values.get(key) {
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a string")),
            None => Ok(None),
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, EtlError> {
        match self.values.get(key) {
            Some(value) => value
                .as_integer()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "an integer")),
            None => Ok(None),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, EtlError> {
        match self.values.get(key) {
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.type_error(key, "a boolean")),
            None => Ok(None),
        }
    }

    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>, EtlError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.type_error(key, "an array of strings"))?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let s = item
                .as_str()
                .ok_or_else(|| self.type_error(key, "an array of strings"))?;
            out.push(s.to_string());
        }
        Ok(Some(out))
    }

    /// A filesystem path option, resolved against the config directory
    /// when relative.
    pub fn require_path(&self, key: &str) -> Result<PathBuf, EtlError> {
        Ok(self.resolve_path(self.require_str(key)?))
    }

    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// A database URL option with relative sqlite paths resolved.
    pub fn database_url(&self, key: &str) -> Result<String, EtlError> {
        Ok(resolve_database_url(self.require_str(key)?, &self.base_dir))
    }

    fn type_error(&self, key: &str, expected: &str) -> EtlError {
        EtlError::config(format!(
            "[{}] option '{}' must be {}",
            self.section, key, expected
        ))
    }
}
