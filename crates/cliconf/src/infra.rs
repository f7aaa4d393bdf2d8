//! Infrastructure configuration - fixed for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Well-known port the server tries before falling back to an ephemeral one.
pub const DEFAULT_PREFERRED_PORT: u16 = 34444;

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Interface to listen on.
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: IpAddr,

    /// Port tried first; 0 means "always ephemeral".
    /// Default: 34444
    #[serde(default = "BindConfig::default_preferred_port")]
    pub preferred_port: u16,
}

impl BindConfig {
    fn default_host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn default_preferred_port() -> u16 {
        DEFAULT_PREFERRED_PORT
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            preferred_port: Self::default_preferred_port(),
        }
    }
}

/// Filesystem locations used by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the bundled resources; the UI lives under `react/`.
    /// Default: `<exe dir>/../resources`
    #[serde(default = "PathsConfig::default_resource_root")]
    pub resource_root: PathBuf,
}

impl PathsConfig {
    pub(crate) fn default_resource_root() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("../resources")))
            .unwrap_or_else(|| PathBuf::from("resources"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            resource_root: Self::default_resource_root(),
        }
    }
}

/// Logging and trace export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive string.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Unset disables span export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

/// Admin channel settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Shared secret handed to the server by its launcher.
    #[serde(default)]
    pub jwt_secret: Option<String>,
}
