//! Configuration parsing and validation.
//!
//! Slate configuration is loaded from TOML files with CLI overrides.
//! Validation runs at load time; a configuration the server cannot
//! honor (for example a transaction memory limit smaller than the
//! largest admissible RPC) refuses startup rather than failing later.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Slate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identity and filesystem layout.
    #[serde(default)]
    pub server: ServerConfig,

    /// Tablet lifecycle and admission tuning.
    #[serde(default)]
    pub tablets: TabletsConfig,

    /// RPC layer constraints consumed by cross-field validation.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tablets: TabletsConfig::default(),
            rpc: RpcConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// Server identity and filesystem paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Data directory holding master blocks, metadata blocks and logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Tablet lifecycle and transaction admission tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletsConfig {
    /// Number of threads available to open tablets.
    #[serde(default = "default_num_tablets_to_open_simultaneously")]
    pub num_tablets_to_open_simultaneously: usize,

    /// If a tablet takes more than this number of millis to start,
    /// issue a warning.
    #[serde(default = "default_start_warn_threshold_ms")]
    pub start_warn_threshold_ms: u64,

    /// Maximum amount of memory that may be consumed by all in-flight
    /// transactions belonging to a particular tablet. When this limit
    /// is reached, new transactions are rejected and clients are
    /// forced to retry them. If -1, transaction memory tracking is
    /// disabled.
    #[serde(default = "default_transaction_memory_limit_mb")]
    pub transaction_memory_limit_mb: i64,
}

impl Default for TabletsConfig {
    fn default() -> Self {
        Self {
            num_tablets_to_open_simultaneously: default_num_tablets_to_open_simultaneously(),
            start_warn_threshold_ms: default_start_warn_threshold_ms(),
            transaction_memory_limit_mb: default_transaction_memory_limit_mb(),
        }
    }
}

/// RPC layer constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Maximum serialized size of an inbound RPC message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_num_tablets_to_open_simultaneously() -> usize {
    50
}

fn default_start_warn_threshold_ms() -> u64 {
    500
}

fn default_transaction_memory_limit_mb() -> i64 {
    64
}

fn default_max_message_size() -> u64 {
    50 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref data_dir) = overrides.data_dir {
            self.server.data_dir = data_dir.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_tablets()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        if self.server.data_dir.is_empty() {
            anyhow::bail!("server.data_dir must not be empty");
        }
        Ok(())
    }

    fn validate_tablets(&self) -> Result<()> {
        if self.tablets.num_tablets_to_open_simultaneously == 0 {
            anyhow::bail!("tablets.num_tablets_to_open_simultaneously must be > 0");
        }

        let limit_mb = self.tablets.transaction_memory_limit_mb;
        if limit_mb < -1 {
            anyhow::bail!(
                "tablets.transaction_memory_limit_mb must be -1 (disabled) or >= 0, got: {}",
                limit_mb
            );
        }

        // A per-tablet transaction budget smaller than the largest
        // admissible RPC would make that request permanently
        // unadmittable.
        if limit_mb >= 0 {
            let limit_bytes = limit_mb as u64 * 1024 * 1024;
            let rpc_max = self.rpc.max_message_size;
            if limit_bytes < rpc_max {
                let min_mb = rpc_max.div_ceil(1024 * 1024);
                anyhow::bail!(
                    "tablets.transaction_memory_limit_mb is set too low compared with \
                     rpc.max_message_size; increase tablets.transaction_memory_limit_mb \
                     at least up to {}",
                    min_mb
                );
            }
        }

        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override data directory.
    pub data_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.tablets.num_tablets_to_open_simultaneously, 50);
        assert_eq!(config.tablets.start_warn_threshold_ms, 500);
        assert_eq!(config.tablets.transaction_memory_limit_mb, 64);
    }

    #[test]
    fn test_minimal_toml_gets_defaults() {
        let config = Config::from_toml("[server]\ndata_dir = \"/tmp/slate\"\n").unwrap();
        assert_eq!(config.server.data_dir, "/tmp/slate");
        assert_eq!(config.tablets.transaction_memory_limit_mb, 64);
    }

    #[test]
    fn test_memory_limit_below_rpc_max_rejected() {
        let mut config = Config::default();
        config.tablets.transaction_memory_limit_mb = 4;
        config.rpc.max_message_size = 50 * 1024 * 1024;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("at least up to 50"), "got: {err}");
    }

    #[test]
    fn test_memory_limit_disabled_skips_rpc_check() {
        let mut config = Config::default();
        config.tablets.transaction_memory_limit_mb = -1;
        config.rpc.max_message_size = u64::MAX;
        config.validate().unwrap();
    }

    #[test]
    fn test_memory_limit_below_negative_one_rejected() {
        let mut config = Config::default();
        config.tablets.transaction_memory_limit_mb = -2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.telemetry.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides_replace_configured_values() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".to_string()),
            data_dir: Some("/var/lib/slate".to_string()),
        });
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.server.data_dir, "/var/lib/slate");
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_overrides_change_nothing() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides::default());
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.server.data_dir, "data");
    }
}
