//! Configuration management for ws-hub.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::server::ServerConfig;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket server configuration.
    pub server: ServerSection,
    /// Admin HTTP API configuration.
    pub admin: AdminSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// WebSocket server section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Listen backlog.
    pub backlog: u32,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Upgrade handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Answer pings automatically.
    pub enable_pong: bool,
    /// Negotiate permessage-deflate.
    pub enable_per_message_deflate: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backlog: 5,
            max_connections: 128,
            handshake_timeout_secs: 3,
            enable_pong: true,
            enable_per_message_deflate: true,
        }
    }
}

/// Admin API section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Serve the admin API.
    pub enabled: bool,
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("WS_HUB_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("WS_HUB_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        if let Some(secs) = var("WS_HUB_HANDSHAKE_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.server.handshake_timeout_secs = secs;
        }

        if let Some(port) = var("WS_HUB_ADMIN_PORT").and_then(|p| p.parse().ok()) {
            self.admin.enabled = true;
            self.admin.port = port;
        }

        if let Some(level) = var("WS_HUB_LOG_LEVEL").or_else(|| var("RUST_LOG")) {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(backlog) = args.backlog {
            self.server.backlog = backlog;
        }
        if let Some(max) = args.max_connections {
            self.server.max_connections = max;
        }
        if let Some(secs) = args.handshake_timeout {
            self.server.handshake_timeout_secs = secs;
        }
        if args.no_pong {
            self.server.enable_pong = false;
        }
        if args.no_deflate {
            self.server.enable_per_message_deflate = false;
        }
        if let Some(port) = args.admin_port {
            self.admin.enabled = true;
            self.admin.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_args(args);
        Ok(config)
    }

    /// Runtime configuration for the WebSocket server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host = parse_host(&self.server.host)?;
        if self.server.handshake_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        let mut config = ServerConfig::new(host, self.server.port)
            .with_backlog(self.server.backlog)
            .with_max_connections(self.server.max_connections)
            .with_handshake_timeout(Duration::from_secs(self.server.handshake_timeout_secs));
        if !self.server.enable_pong {
            config = config.disable_pong();
        }
        if !self.server.enable_per_message_deflate {
            config = config.disable_per_message_deflate();
        }
        Ok(config)
    }

    /// Bind address of the admin API, if enabled.
    pub fn admin_address(&self) -> Result<Option<SocketAddr>, ConfigError> {
        if !self.admin.enabled {
            return Ok(None);
        }
        let host = parse_host(&self.admin.host)?;
        Ok(Some(SocketAddr::new(host, self.admin.port)))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn parse_host(host: &str) -> Result<IpAddr, ConfigError> {
    host.parse()
        .map_err(|_| ConfigError::InvalidHost(host.to_string()))
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
    /// Handshake timeout of zero.
    InvalidTimeout,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
            Self::InvalidTimeout => write!(f, "handshake timeout must be at least one second"),
        }
    }
}

impl std::error::Error for ConfigError {}
