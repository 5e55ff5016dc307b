//! Connection configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable libvirt itself honours for the default URI.
pub const DEFAULT_URI_ENV: &str = "LIBVIRT_DEFAULT_URI";

/// URI used when neither the config nor the environment names one.
pub const DEFAULT_URI: &str = "qemu:///system";

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtConfig {
    /// Hypervisor connection URI
    pub uri: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for VirtConfig {
    fn default() -> Self {
        Self {
            uri: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines for log aggregation
    Json,
}

impl VirtConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: VirtConfig = serde_yaml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Set the connection URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// The URI to connect to: the configured one, then
    /// `LIBVIRT_DEFAULT_URI`, then `qemu:///system`.
    pub fn resolved_uri(&self) -> String {
        self.resolve_uri_with(std::env::var(DEFAULT_URI_ENV).ok())
    }

    fn resolve_uri_with(&self, env_uri: Option<String>) -> String {
        self.uri
            .clone()
            .or_else(|| env_uri.filter(|u| !u.is_empty()))
            .unwrap_or_else(|| DEFAULT_URI.to_string())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if let Some(uri) = &self.uri {
            if uri.trim().is_empty() {
                anyhow::bail!("uri must not be empty when set");
            }
        }

        if !limiquantix_common::is_valid_level(&self.log_level) {
            anyhow::bail!(
                "Invalid log_level '{}', expected one of: {}",
                self.log_level,
                limiquantix_common::LOG_LEVELS.join(", ")
            );
        }

        Ok(())
    }

    /// Install the global tracing subscriber described by this config.
    pub fn init_logging(&self) -> Result<()> {
        match self.log_format {
            LogFormat::Pretty => limiquantix_common::init_logging(&self.log_level),
            LogFormat::Json => limiquantix_common::init_logging_json(&self.log_level),
        }
    }
}
