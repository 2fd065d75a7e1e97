//! Error types for strata operations
//!
//! Only construction and configuration surface these. Store and fetch paths
//! of the cache backends log and degrade to a miss instead.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Failed to parse configuration document: {reason}")]
    Parse { reason: String },
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Remote cache connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },

    #[error("Remote cache command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Disk store error: {reason}")]
    Disk { reason: String },

    #[error("Failed to register metric {metric}: {reason}")]
    Metrics { metric: String, reason: String },
}

/// Master error type for all strata errors.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type alias for strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================
