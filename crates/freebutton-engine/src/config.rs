//! TOML configuration for the engine

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compile::CompileOptions;
use crate::error::ConfigError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Label of the user bytecode partition
    pub partition_label: String,

    /// Size of the in-memory user partition in bytes
    pub partition_size: usize,

    /// Directory `load()` resolves file names against
    pub scripts_dir: PathBuf,

    /// Where the registry is persisted, if anywhere
    pub registry_path: Option<PathBuf>,

    /// Pre-relocate uploads for zero-copy execution
    pub pre_relocate: bool,

    /// Names registered after the stdlib atoms, for native extensions
    pub extra_atoms: Vec<String>,

    /// Compile driver settings
    pub compile: CompileOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition_label: "js_user".to_string(),
            partition_size: 256 * 1024,
            scripts_dir: PathBuf::from("."),
            registry_path: None,
            pre_relocate: true,
            extra_atoms: Vec::new(),
            compile: CompileOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
