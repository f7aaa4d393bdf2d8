//! Configuration loading for the cli-server.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/cli-server/config.toml` (system)
//! 2. `~/.config/cli-server/config.toml` (user)
//! 3. `./cli-server.toml` (local override, replaced by `--config` when given)
//! 4. Environment variables (`CLI_SERVER_*`, `RUST_LOG`, `OTEL_EXPORTER_OTLP_ENDPOINT`)
//!
//! Files are deep-merged key by key, so a local file only needs the keys it
//! changes.
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "127.0.0.1"
//! preferred_port = 34444
//!
//! [paths]
//! resource_root = "~/.local/share/cli-server/resources"
//!
//! [telemetry]
//! log_level = "info,tower_http=debug"
//! otlp_endpoint = "127.0.0.1:4317"
//!
//! [admin]
//! jwt_secret = "handed-over-by-the-launcher"
//! ```

pub mod infra;
pub mod loader;

pub use infra::{AdminConfig, BindConfig, PathsConfig, TelemetryConfig, DEFAULT_PREFERRED_PORT};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete cli-server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

impl CliConfig {
    /// Load configuration from all sources and report where values came from.
    ///
    /// `config_path` stands in for `./cli-server.toml`; a path that cannot be
    /// read is an error rather than being skipped.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::merge_tables(&mut merged, loader::load_table(&path)?);
            sources.files.push(path);
        }

        let mut config = loader::config_from_table(merged)?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Load a single file with no discovery and no environment overlay.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        loader::config_from_table(loader::load_table(path)?)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
