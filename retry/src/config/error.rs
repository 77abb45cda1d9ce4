use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading [`RetrySettings`](super::RetrySettings)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or merged.
    #[error("Failed to load retry settings: {0}")]
    Load(String),

    #[error("Retry settings file not found at path: {0}")]
    FileNotFound(PathBuf),

    /// Built-in defaults could not be serialized as the base layer.
    #[error("Failed to encode default retry settings: {0}")]
    Defaults(String),

    /// Every out-of-range value, one entry per problem.
    #[error("Invalid retry settings: {}", .problems.join("; "))]
    Invalid { problems: Vec<String> },
}

impl ConfigError {
    /// Problems reported by validation; empty for other kinds.
    pub fn problems(&self) -> &[String] {
        match self {
            ConfigError::Invalid { problems } => problems,
            _ => &[],
        }
    }
}

/// Type alias for Results using ConfigError
pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Defaults(err.to_string())
    }
}
