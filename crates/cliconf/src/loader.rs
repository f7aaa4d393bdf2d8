//! Config file discovery, TOML merging, and environment variable overlay.

use crate::{CliConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override. It is returned
/// even when missing so that loading it reports the bad path.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/cli-server/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("cli-server/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("cli-server.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read and parse one TOML file into a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents
        .parse()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Deep-merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// Turn a merged table into a config, filling unset fields with defaults.
pub fn config_from_table(table: toml::Table) -> Result<CliConfig, ConfigError> {
    let mut config = toml::Value::Table(table)
        .try_into::<CliConfig>()
        .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;

    config.paths.resource_root = expand_path(&config.paths.resource_root.to_string_lossy());
    Ok(config)
}

/// Apply process environment overrides to config.
pub fn apply_env_overrides(config: &mut CliConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Unparseable values (a non-numeric port, a bad address) are skipped and not
/// recorded in `sources`.
pub fn apply_overrides_from<F>(config: &mut CliConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut record = |key: &str| sources.env_overrides.push(key.to_string());

    if let Some(v) = lookup("CLI_SERVER_HOST") {
        if let Ok(host) = v.parse() {
            config.bind.host = host;
            record("CLI_SERVER_HOST");
        }
    }
    if let Some(v) = lookup("CLI_SERVER_PORT") {
        if let Ok(port) = v.parse() {
            config.bind.preferred_port = port;
            record("CLI_SERVER_PORT");
        }
    }

    if let Some(v) = lookup("CLI_SERVER_RESOURCE_ROOT") {
        config.paths.resource_root = expand_path(&v);
        record("CLI_SERVER_RESOURCE_ROOT");
    }

    if let Some(v) = lookup("CLI_SERVER_LOG_LEVEL") {
        config.telemetry.log_level = v;
        record("CLI_SERVER_LOG_LEVEL");
    }
    // RUST_LOG wins over our own variable
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        record("RUST_LOG");
    }
    if let Some(v) = lookup("CLI_SERVER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("CLI_SERVER_OTLP_ENDPOINT");
    }
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v);
        record("OTEL_EXPORTER_OTLP_ENDPOINT");
    }

    if let Some(v) = lookup("CLI_SERVER_JWT_SECRET") {
        config.admin.jwt_secret = Some(v);
        record("CLI_SERVER_JWT_SECRET");
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        match stripped.split_once('/') {
            Some((var_name, rest)) => env::var(var_name)
                .map(|value| PathBuf::from(value).join(rest))
                .unwrap_or_else(|_| PathBuf::from(path)),
            None => env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path)),
        }
    } else {
        PathBuf::from(path)
    }
}
