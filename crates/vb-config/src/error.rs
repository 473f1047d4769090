//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for loading and validating `bridge.yaml`
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything that can go wrong between reading `bridge.yaml` and a usable `BridgeConfig`
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config, include or secrets file could not be read
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML, or does not match the expected shape
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!secret` names a key missing from secrets.yaml
    #[error("secret '{key}' not found in secrets.yaml")]
    SecretNotFound { key: String },

    /// `!include` argument is not a usable relative path
    #[error("invalid include path '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// A file includes itself, directly or through other includes
    #[error("circular include detected: {path}")]
    CircularInclude { path: PathBuf },

    /// `!env_var` names an unset variable and gives no fallback
    #[error("environment variable '{var}' not set")]
    EnvVarNotFound { var: String },

    /// A single value is out of range or of the wrong kind
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Parsed fine but fails a semantic check
    #[error("configuration validation failed: {message}")]
    ValidationFailed { message: String },
}
