//! Typed configuration for both sides of the tunnel, loaded from a TOML
//! file (`toml` + `serde`, both already load-bearing dependencies of the
//! wider codebase this one grew out of).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;

/// Logging verbosity, shared by both binaries. Mirrors the `LogLevel` enum
/// used for structured logging elsewhere in this family of tools, trimmed
/// to the levels `tracing` itself recognizes.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// `client.toml`
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Loopback `host:port` pairs to receive DNS queries on.
    pub end_points: Vec<String>,
    /// `wss://` URI of the tunnel server.
    pub resolver: String,
    /// Pre-shared token sent as the first (TEXT) WebSocket message.
    pub resolver_auth_token: String,
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&raw)?;
        if config.end_points.is_empty() {
            return Err(ConfigError::MissingField("end_points".into()));
        }
        config.parsed_end_points()?; // validate eagerly
        Ok(config)
    }

    /// Parse every configured bind address, failing loudly on the first
    /// unparseable one (configuration-invalid is a fatal startup error).
    pub fn parsed_end_points(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.end_points
            .iter()
            .map(|raw| {
                raw.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidEndpoint(raw.clone()))
            })
            .collect()
    }
}

/// `server.toml`
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind addresses the WebSocket acceptor listens on.
    pub urls: Vec<String>,
    /// `host:port` of the upstream DNS resolver queries are forwarded to.
    pub resolver: String,
    /// The set of tokens a client may authenticate with.
    pub auth_token: Vec<String>,
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&raw)?;
        if config.urls.is_empty() {
            return Err(ConfigError::MissingField("urls".into()));
        }
        if config.auth_token.is_empty() {
            return Err(ConfigError::MissingField("auth_token".into()));
        }
        config.parsed_urls()?;
        config.parsed_resolver()?;
        Ok(config)
    }

    pub fn parsed_urls(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.urls
            .iter()
            .map(|raw| {
                raw.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidEndpoint(raw.clone()))
            })
            .collect()
    }

    pub fn parsed_resolver(&self) -> Result<SocketAddr, ConfigError> {
        self.resolver
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidEndpoint(self.resolver.clone()))
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
