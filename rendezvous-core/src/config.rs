// rendezvous-core/src/config.rs

//! Configuration for the rendezvous server and its pool clients.
//!
//! Both configurations are read from TOML, may be overridden through
//! `RDV_`-prefixed environment variables, and are validated before use.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{RendezvousError, Result};

/// Default base port of a server's transport.
pub const DEFAULT_PORT: u16 = 8888;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub logging: LoggingConfig,
    pub remote: RemoteConfig,
}

// Network identity of the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    // Host the transport binds to.
    pub bind_host: String,
    // Base port; virtual ports are served relative to it. 0 = ephemeral.
    pub port: u16,
    /// Host name advertised as the server's local address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertised_host: Option<String>,
    /// Peer/hub addresses known at startup.
    pub hub_addresses: Vec<String>,
    /// Service kinds to start. Empty means every registered kind.
    pub services: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            advertised_host: None,
            hub_addresses: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// Logging and reporting options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Log every pool join and release.
    pub events: bool,
    /// Log full error chains instead of one-line summaries.
    pub errors: bool,
    /// Seconds between statistics reports. 0 disables reporting.
    pub stats_interval_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            events: false,
            errors: false,
            stats_interval_secs: 0,
        }
    }
}

/// Framing used on the remote-control stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Fixed-width binary fields.
    #[default]
    Binary,
    /// Marker-prefixed text lines; foreign lines are skipped.
    Line,
}

impl FromStr for Framing {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "line" | "text" => Ok(Self::Line),
            other => Err(RendezvousError::config(format!(
                "remote.framing must be 'binary' or 'line', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub framing: Framing,
}

impl FromStr for ServerConfig {
    type Err = RendezvousError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| RendezvousError::config_with_source("failed to parse TOML config", e))
    }
}

impl ServerConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_config_file(path.as_ref())?.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // - `RDV_BIND_HOST`, `RDV_PORT`, `RDV_ADVERTISED_HOST`
    // - `RDV_HUB_ADDRESSES` (comma separated, appended to the configured list)
    // - `RDV_SERVICES` (comma separated, replaces the configured list)
    // - `RDV_LOG_LEVEL`, `RDV_LOG_EVENTS`, `RDV_LOG_ERRORS`, `RDV_STATS_INTERVAL_SECS`
    // - `RDV_REMOTE_FRAMING`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RDV_BIND_HOST") {
            self.server.bind_host = val;
        }
        if let Ok(val) = std::env::var("RDV_PORT") {
            if let Ok(v) = val.parse() {
                self.server.port = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_ADVERTISED_HOST") {
            self.server.advertised_host = Some(val);
        }
        if let Ok(val) = std::env::var("RDV_HUB_ADDRESSES") {
            self.server.hub_addresses.extend(split_list(&val));
        }
        if let Ok(val) = std::env::var("RDV_SERVICES") {
            self.server.services = split_list(&val);
        }

        if let Ok(val) = std::env::var("RDV_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("RDV_LOG_EVENTS") {
            if let Ok(v) = val.parse() {
                self.logging.events = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_LOG_ERRORS") {
            if let Ok(v) = val.parse() {
                self.logging.errors = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_STATS_INTERVAL_SECS") {
            if let Ok(v) = val.parse() {
                self.logging.stats_interval_secs = v;
            }
        }

        if let Ok(val) = std::env::var("RDV_REMOTE_FRAMING") {
            if let Ok(v) = val.parse() {
                self.remote.framing = v;
            }
        }

        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_host.is_empty() {
            return Err(RendezvousError::config(
                "server.bind_host must not be empty",
            ));
        }
        if let Some(host) = &self.server.advertised_host {
            if host.is_empty() {
                return Err(RendezvousError::config(
                    "server.advertised_host must not be empty when set",
                ));
            }
        }
        if self.server.hub_addresses.iter().any(|h| h.trim().is_empty()) {
            return Err(RendezvousError::config(
                "server.hub_addresses must not contain empty entries",
            ));
        }
        if self.logging.level.is_empty() {
            return Err(RendezvousError::config("logging.level must not be empty"));
        }
        Ok(())
    }
}

/// Client-side settings for joining a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolClientConfig {
    /// Address of the rendezvous server (`host` or `host:port`).
    pub server_address: Option<String>,
    /// Port used when `server_address` carries none.
    pub default_port: u16,
    /// Name of the pool to join.
    pub pool_name: Option<String>,
    /// Total number of members in the pool.
    pub pool_size: i32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for PoolClientConfig {
    fn default() -> Self {
        Self {
            server_address: None,
            default_port: DEFAULT_PORT,
            pool_name: None,
            pool_size: 0,
            connect_timeout_ms: 5_000,
        }
    }
}

impl FromStr for PoolClientConfig {
    type Err = RendezvousError;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| RendezvousError::config_with_source("failed to parse TOML config", e))
    }
}

impl PoolClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_config_file(path.as_ref())?.parse()?;
        config.validate()?;
        Ok(config)
    }

    // `RDV_SERVER_ADDRESS`, `RDV_PORT`, `RDV_POOL_NAME`, `RDV_POOL_SIZE`,
    // `RDV_CONNECT_TIMEOUT_MS`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("RDV_SERVER_ADDRESS") {
            self.server_address = Some(val);
        }
        if let Ok(val) = std::env::var("RDV_PORT") {
            if let Ok(v) = val.parse() {
                self.default_port = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_POOL_NAME") {
            self.pool_name = Some(val);
        }
        if let Ok(val) = std::env::var("RDV_POOL_SIZE") {
            if let Ok(v) = val.parse() {
                self.pool_size = v;
            }
        }
        if let Ok(val) = std::env::var("RDV_CONNECT_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.connect_timeout_ms = v;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        match &self.server_address {
            Some(address) if !address.is_empty() => {}
            _ => {
                return Err(RendezvousError::config(
                    "server_address undefined, cannot locate server",
                ))
            }
        }
        match &self.pool_name {
            Some(name) if !name.is_empty() => {}
            _ => return Err(RendezvousError::config("pool_name must be set")),
        }
        if self.pool_size <= 0 {
            return Err(RendezvousError::config(format!(
                "invalid or unknown pool size: {}",
                self.pool_size
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(RendezvousError::config(
                "connect_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        RendezvousError::config_with_source(
            format!("failed to read config file '{}'", path.display()),
            e,
        )
    })
}

/// Splits a comma separated list, dropping blank entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.server.bind_host, "0.0.0.0");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.server.advertised_host.is_none());
        assert!(config.server.hub_addresses.is_empty());
        assert!(config.server.services.is_empty());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.events);
        assert_eq!(config.logging.stats_interval_secs, 0);
        assert_eq!(config.remote.framing, Framing::Binary);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [server]
            port = 9000
            hub_addresses = ["hub1:5332"]

            [remote]
            framing = "line"
        "#;
        let config: ServerConfig = toml.parse().unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.hub_addresses, vec!["hub1:5332".to_string()]);
        assert_eq!(config.server.bind_host, "0.0.0.0");
        assert_eq!(config.remote.framing, Framing::Line);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: std::result::Result<ServerConfig, _> = "port = [".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [logging]
            events = true
            stats_interval_secs = 10
            "#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.logging.events);
        assert_eq!(config.logging.stats_interval_secs, 10);
    }

    #[test]
    fn test_from_file_not_found() {
        assert!(ServerConfig::from_file("/nonexistent/rendezvous.toml").is_err());
    }

    #[test]
    fn test_validate_empty_hub_entry() {
        let mut config = ServerConfig::default();
        config.server.hub_addresses = vec!["  ".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hub_addresses"));
    }

    #[test]
    fn test_framing_from_str() {
        assert_eq!("binary".parse::<Framing>().unwrap(), Framing::Binary);
        assert_eq!("LINE".parse::<Framing>().unwrap(), Framing::Line);
        assert!("json".parse::<Framing>().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("a:1, b:2,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_pool_client_config_validation() {
        let mut config = PoolClientConfig::default();
        assert!(config.validate().unwrap_err().to_string().contains("server_address"));

        config.server_address = Some("localhost".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("pool_name"));

        config.pool_name = Some("job".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("pool size"));

        config.pool_size = 4;
        assert!(config.validate().is_ok());
    }

    // Environment variable tests live in one test: env vars are process-global.
    #[test]
    fn test_env_overrides() {
        for (key, _) in std::env::vars() {
            if key.starts_with("RDV_") {
                std::env::remove_var(&key);
            }
        }

        std::env::set_var("RDV_PORT", "7000");
        std::env::set_var("RDV_HUB_ADDRESSES", "h1:1000,h2:2000");
        std::env::set_var("RDV_LOG_EVENTS", "true");
        std::env::set_var("RDV_REMOTE_FRAMING", "line");
        std::env::set_var("RDV_POOL_NAME", "job-7");
        std::env::set_var("RDV_POOL_SIZE", "not_a_number");

        let config = ServerConfig::default().with_env_overrides();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.hub_addresses.len(), 2);
        assert!(config.logging.events);
        assert_eq!(config.remote.framing, Framing::Line);

        let client = PoolClientConfig::default().with_env_overrides();
        assert_eq!(client.pool_name.as_deref(), Some("job-7"));
        assert_eq!(client.default_port, 7000);
        // unparsable values keep the default
        assert_eq!(client.pool_size, 0);

        for key in [
            "RDV_PORT",
            "RDV_HUB_ADDRESSES",
            "RDV_LOG_EVENTS",
            "RDV_REMOTE_FRAMING",
            "RDV_POOL_NAME",
            "RDV_POOL_SIZE",
        ] {
            std::env::remove_var(key);
        }
    }
}
