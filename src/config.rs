//! Configuration module for the poll-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Port used when none is given or the given one is unusable.
pub const DEFAULT_PORT: u16 = 8000;

/// Largest accepted connection table, listener slot included.
pub const MAX_CONNECTIONS_LIMIT: usize = 65536;

/// Largest accepted echo chunk.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "poll-echo")]
#[command(author = "poll-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-shot TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (non-numeric or zero falls back to 8000)
    #[arg(short, long, allow_hyphen_values = true)]
    pub port: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog handed to the kernel
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Connection table capacity, listener slot included
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Size of one echo chunk in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Upper bound on one poll call, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> i32 {
    1
}

fn default_max_connections() -> usize {
    128
}

fn default_buffer_size() -> usize {
    8192
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Interpret a `--port` argument.
///
/// Anything that is not a non-zero port number silently maps to
/// [`DEFAULT_PORT`]. The whole argument must be numeric: `80x` is
/// rejected rather than read as 80.
pub fn resolve_port(arg: &str) -> u16 {
    match arg.trim().parse::<u16>() {
        Ok(0) | Err(_) => DEFAULT_PORT,
        Ok(port) => port,
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub poll_timeout: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI arguments against the optional TOML file.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(Some(&cli), toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: Option<&CliArgs>, toml_config: TomlConfig) -> Self {
        let cli_port = cli.and_then(|c| c.port.as_deref()).map(resolve_port);
        let cli_level = cli.and_then(|c| c.log_level.clone());

        let port = match cli_port {
            Some(port) => port,
            None if toml_config.server.port == 0 => DEFAULT_PORT,
            None => toml_config.server.port,
        };

        Config {
            port,
            backlog: toml_config.server.backlog,
            max_connections: toml_config.server.max_connections,
            buffer_size: toml_config.server.buffer_size,
            poll_timeout: Duration::from_millis(toml_config.server.poll_timeout_ms),
            log_level: cli_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Check the limits the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Slot 0 belongs to the listener.
        if !(2..=MAX_CONNECTIONS_LIMIT).contains(&self.max_connections) {
            return Err(ConfigError::Invalid(format!(
                "max_connections must be between 2 and {MAX_CONNECTIONS_LIMIT}, got {}",
                self.max_connections
            )));
        }
        if !(1..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be between 1 and {MAX_BUFFER_SIZE}, got {}",
                self.buffer_size
            )));
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
