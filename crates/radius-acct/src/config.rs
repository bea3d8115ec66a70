use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server listen address
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Server listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Shared secret used to sign Accounting-Responses
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Drop retransmitted requests (default: true)
    #[serde(default = "default_deduplication")]
    pub deduplication: bool,

    /// Interval between retransmission cache sweeps in seconds (default: 10)
    #[serde(default = "default_clean_cycle_seconds")]
    pub clean_cycle_seconds: u64,

    /// How long a request is remembered for deduplication in seconds (default: 300)
    #[serde(default = "default_entry_lifetime_seconds")]
    pub entry_lifetime_seconds: u64,

    /// Upper bound on one handler invocation in seconds (default: 30)
    #[serde(default = "default_handler_timeout_seconds")]
    pub handler_timeout_seconds: u64,

    /// Maximum number of requests processed at once (default: unbounded)
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// JSON Lines output file; records go to stdout when unset
    #[serde(default)]
    pub output_path: Option<String>,
}

/// Accepted values for `log_level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    1813 // Standard RADIUS accounting port
}

fn default_secret() -> String {
    "testing123".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_deduplication() -> bool {
    true
}

fn default_clean_cycle_seconds() -> u64 {
    10
}

fn default_entry_lifetime_seconds() -> u64 {
    300
}

fn default_handler_timeout_seconds() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            secret: default_secret(),
            log_level: default_log_level(),
            deduplication: default_deduplication(),
            clean_cycle_seconds: default_clean_cycle_seconds(),
            entry_lifetime_seconds: default_entry_lifetime_seconds(),
            handler_timeout_seconds: default_handler_timeout_seconds(),
            max_in_flight: None,
            output_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr: IpAddr = self.listen_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid IP address: {}", self.listen_address))
        })?;
        Ok(SocketAddr::new(addr, self.listen_port))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if self.secret.is_empty() {
            return Err(ConfigError::Invalid("Secret cannot be empty".to_string()));
        }

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {} (expected one of {})",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.clean_cycle_seconds == 0 {
            return Err(ConfigError::Invalid(
                "clean_cycle_seconds cannot be 0".to_string(),
            ));
        }
        if self.entry_lifetime_seconds == 0 {
            return Err(ConfigError::Invalid(
                "entry_lifetime_seconds cannot be 0".to_string(),
            ));
        }
        if self.handler_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "handler_timeout_seconds cannot be 0".to_string(),
            ));
        }

        if self.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        if let Some(path) = &self.output_path {
            if path.is_empty() {
                return Err(ConfigError::Invalid(
                    "output_path cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        Config {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 1813,
            secret: "testing123".to_string(),
            log_level: "info".to_string(),
            deduplication: true,
            clean_cycle_seconds: 10,
            entry_lifetime_seconds: 300,
            handler_timeout_seconds: 30,
            max_in_flight: Some(1024),
            output_path: Some("/var/log/radius/accounting.jsonl".to_string()),
        }
    }
}
