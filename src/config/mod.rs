//! Configuration management for memload
//!
//! Handles configuration loading and validation for the memory backing,
//! export invocation and logging.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Longest name accepted by `memfd_create` (excluding the "memfd:" prefix)
pub const MAX_BACKING_NAME_LEN: usize = 249;

/// Whether the memory backing is sealed after population
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealPolicy {
    /// Fail the load if the platform cannot seal the backing
    Required,
    /// Seal when supported, otherwise continue unsealed
    #[default]
    BestEffort,
    /// Never seal
    Disabled,
}

/// Anonymous memory backing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingConfig {
    /// Debug name given to the memory object (visible in /proc/<pid>/fd)
    #[serde(default = "default_backing_name")]
    pub name: String,

    /// Sealing policy applied once the image is written
    #[serde(default)]
    pub sealing: SealPolicy,
}

fn default_backing_name() -> String {
    "extension".to_string()
}

impl Default for BackingConfig {
    fn default() -> Self {
        Self {
            name: default_backing_name(),
            sealing: SealPolicy::default(),
        }
    }
}

/// Export invocation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Abandon an export call after this many seconds (None = wait forever)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl InvokeConfig {
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_seconds.map(std::time::Duration::from_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "memload=debug"); RUST_LOG takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Top-level loader configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub backing: BackingConfig,

    #[serde(default)]
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl LoaderConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: LoaderConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: LoaderConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let name = &self.backing.name;
        if name.is_empty() {
            anyhow::bail!("backing.name cannot be empty");
        }
        if name.len() > MAX_BACKING_NAME_LEN {
            anyhow::bail!(
                "backing.name is {} bytes, limit is {}",
                name.len(),
                MAX_BACKING_NAME_LEN
            );
        }
        if name.contains('\0') {
            anyhow::bail!("backing.name cannot contain NUL bytes");
        }
        if self.invoke.timeout_seconds == Some(0) {
            anyhow::bail!("invoke.timeout_seconds must be greater than zero");
        }
        Ok(())
    }
}
