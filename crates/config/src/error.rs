//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write configuration file
    #[error("Failed to write config file at {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize configuration
    #[error("Failed to serialize config: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Empty chain identifier
    #[error("Invalid chain ID: chain_id must not be empty")]
    InvalidChainId,

    /// Invalid timeout configuration
    #[error("Invalid timeout: {name} must be positive, got {value}ms")]
    InvalidTimeout { name: &'static str, value: u64 },

    /// Quorum fraction outside (0, 1]
    #[error("Invalid quorum fraction {numerator}/{denominator}: must be in (0, 1]")]
    InvalidQuorum { numerator: u64, denominator: u64 },

    /// Threshold percentage outside 1..=100
    #[error("Invalid threshold percentage: must be between 1 and 100, got {0}")]
    InvalidThreshold(u8),

    /// Invalid percentage value
    #[error("Invalid {name}: must be <= 100, got {value}")]
    InvalidPercentage { name: &'static str, value: u8 },

    /// Jitter fraction outside [0, 1]
    #[error("Invalid jitter: must be between 0.0 and 1.0, got {0}")]
    InvalidJitter(f64),

    /// Zero-valued count where at least one is needed
    #[error("Invalid {name}: must be at least 1")]
    ZeroCount { name: &'static str },

    /// Minimum block size above maximum
    #[error("Invalid block size: min_block_transactions {min} exceeds max_block_transactions {max}")]
    InvalidBlockSize { min: usize, max: usize },

    /// Retry ceiling below the base delay
    #[error("Invalid retry delays: retry_max_ms {max} is below retry_base_ms {base}")]
    InvalidRetryRange { base: u64, max: u64 },

    /// Latency range inverted
    #[error("Invalid latency range: min {min}ms exceeds max {max}ms")]
    InvalidLatencyRange { min: u64, max: u64 },

    /// Not enough participants for the requested roles
    #[error("Too few participants: {required} required, got {actual}")]
    TooFewParticipants { required: usize, actual: usize },

    /// Invalid log level
    #[error("Invalid log level: {0}. Valid values: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Invalid log format
    #[error("Invalid log format: {0}. Valid values: text, json, compact")]
    InvalidLogFormat(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
