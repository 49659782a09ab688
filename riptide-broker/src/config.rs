//! Broker configuration.
//!
//! The configuration is a small immutable table captured at startup and
//! passed by reference into each component; there is no runtime
//! reconfiguration. It loads from a TOML file (`riptide.toml` in the
//! working directory, then `/etc/riptide.toml`, overridable via the
//! `RIPTIDE_CONFIG` environment variable) and falls back to defaults
//! when no file is present.

use riptide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming an explicit config file path.
pub const CONFIG_ENV: &str = "RIPTIDE_CONFIG";

const CONFIG_SEARCH_PATHS: &[&str] = &["riptide.toml", "/etc/riptide.toml"];

/// Configuration for the broker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Network binding and admission configuration.
    pub network: NetworkConfig,

    /// Routing substrate configuration.
    pub router: RouterConfig,

    /// Optional pidfile path; written on start, removed on stop.
    pub pid_file: Option<PathBuf>,

    /// Tracing filter directive applied when `RUST_LOG` is unset.
    pub log_filter: String,
}

/// Network configuration for client connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Interface to bind; `any` means all interfaces.
    pub listen_ip: String,

    /// TCP port to listen on.
    pub tcp_server_port: u16,

    /// Hard cap on concurrent connections.
    pub max_tcp_clients: usize,

    /// Per-connection idle bound in seconds; a connection receiving no
    /// complete request within it is closed.
    pub idle_timeout_secs: u64,
}

/// Routing substrate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Shard count; fixed at startup.
    pub num_shards: usize,

    /// Per-publish subscriber-count threshold that logs a warning.
    pub min_fanout_to_warn: usize,

    /// Per-publish topic-count threshold that logs a warning.
    pub min_publish_to_topics_to_warn: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            router: RouterConfig::default(),
            pid_file: None,
            log_filter: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_ip: "any".to_string(),
            tcp_server_port: 12355,
            max_tcp_clients: 1000,
            idle_timeout_secs: 300,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { num_shards: 4, min_fanout_to_warn: 100, min_publish_to_topics_to_warn: 20 }
    }
}

impl NetworkConfig {
    /// Resolve the configured interface and port into a bind address.
    ///
    /// # Errors
    /// Returns an error if `listen_ip` is neither `any` nor a valid IP
    /// address.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = if self.listen_ip == "any" {
            IpAddr::from([0, 0, 0, 0])
        } else {
            self.listen_ip
                .parse()
                .map_err(|_| Error::configuration(format!("invalid listen_ip: {:?}", self.listen_ip)))?
        };
        Ok(SocketAddr::new(ip, self.tcp_server_port))
    }

    /// The idle bound as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl BrokerConfig {
    /// Load configuration: explicit `RIPTIDE_CONFIG` path if set,
    /// otherwise the first file found in the search paths, otherwise
    /// defaults.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load_from_file(path);
        }

        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        debug!("no configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, fails to parse, or
    /// fails validation.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| {
            Error::configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error on a zero shard count, zero client cap, zero
    /// idle timeout, or unparseable listen address.
    pub fn validate(&self) -> Result<()> {
        if self.router.num_shards == 0 {
            return Err(Error::configuration("num_shards must be greater than 0"));
        }
        if self.network.max_tcp_clients == 0 {
            return Err(Error::configuration("max_tcp_clients must be greater than 0"));
        }
        if self.network.idle_timeout_secs == 0 {
            return Err(Error::configuration("idle_timeout_secs must be greater than 0"));
        }
        self.network.bind_address()?;
        Ok(())
    }
}
