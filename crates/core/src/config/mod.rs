use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{ExclusionTable, ExplorationMode, FunctionFilter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Unsupported config format for {0} (expected .json, .yaml or .yml)")]
    UnsupportedFormat(PathBuf),
}

fn default_tracelet() -> i64 {
    -1
}

fn default_loop_bound() -> u32 {
    1
}

/// Options controlling how one binary is dumped. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpOptions {
    /// Function names to keep; `None` keeps all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<FunctionFilter>,
    /// Tracelet length in steps; negative selects full-function mode.
    #[serde(default = "default_tracelet")]
    pub tracelet: i64,
    /// Tracelet mode only: also start tracelets at blocks an earlier path already covered.
    #[serde(default)]
    pub allow_overlap: bool,
    /// Maximum traversals of any single back edge.
    #[serde(default = "default_loop_bound")]
    pub loop_bound: u32,
    /// Above 1, recovered evaluation/exploration failures abort the binary instead.
    #[serde(default)]
    pub verbosity: u8,
    /// Extra register offsets to exclude, keyed by architecture name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub register_exclusions: BTreeMap<String, Vec<u64>>,
    /// Batch worker count; `None` uses one per CPU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            functions: None,
            tracelet: default_tracelet(),
            allow_overlap: false,
            loop_bound: default_loop_bound(),
            verbosity: 0,
            register_exclusions: BTreeMap::new(),
            jobs: None,
        }
    }
}

impl DumpOptions {
    /// Load options from a `.json`, `.yaml`, or `.yml` file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let body = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
            "json" => Ok(serde_json::from_str(&body)?),
            "yaml" | "yml" => Ok(serde_yaml::from_str(&body)?),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn mode(&self) -> ExplorationMode {
        ExplorationMode::from_tracelet(self.tracelet, self.allow_overlap)
    }

    /// Whether recovered failures should propagate instead.
    pub fn strict(&self) -> bool {
        self.verbosity > 1
    }

    /// Built-in exclusions plus `register_exclusions`.
    pub fn exclusion_table(&self) -> ExclusionTable {
        let mut table = ExclusionTable::default();
        for (arch, offsets) in &self.register_exclusions {
            table.extend(arch, offsets.iter().copied());
        }
        table
    }
}
