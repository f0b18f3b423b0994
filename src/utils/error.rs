//! Error handling for the decision pipeline.

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data-related errors (e.g. missing or malformed market data)
    #[error("Data error: {0}")]
    DataError(String),

    /// Malformed request or signal
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Key/value or blob store failures
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Optimistic write lost against a concurrent writer
    #[error("State conflict on '{key}': expected version {expected}, found {found}")]
    StateConflict { key: String, expected: u64, found: u64 },

    /// Text-generation collaborator failures
    #[error("Text generation error: {0}")]
    TextGenerationError(String),

    /// An external call did not answer in time
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// A decision-rule predicate could not be evaluated
    #[error("Rule error: {0}")]
    RuleError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Request errors
    #[error("Request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code used in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            | Error::ValidationError(_) => "invalid_request",
            | Error::PersistenceError(_) => "persistence_failure",
            | Error::StateConflict { .. } => "state_conflict",
            | Error::TextGenerationError(_) | Error::ReqwestError(_) => "text_generation_failure",
            | Error::Timeout(_) => "timeout",
            | Error::ConfigError(_) | Error::TomlError(_) | Error::TomlSerializeError(_) => {
                "configuration_error"
            }
            | Error::DataError(_) => "insufficient_data",
            | _ => "internal_error",
        }
    }

    /// True for failures the caller caused (bad input), as opposed to pipeline faults.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::ValidationError(_))
    }
}

/// Result type for the pipeline
pub type Result<T> = std::result::Result<T, Error>;

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("task join error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_error = Error::ConfigError("missing field".to_string());
        assert_eq!(config_error.to_string(), "Configuration error: missing field");

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let wrapped_io_error = Error::from(io_error);
        assert!(wrapped_io_error.to_string().contains("I/O error"));

        let str_error = Error::from("custom error");
        assert_eq!(str_error.to_string(), "Error: custom error");

        let conflict = Error::StateConflict { key: "default".into(), expected: 3, found: 4 };
        assert!(conflict.to_string().contains("expected version 3"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ValidationError("x".into()).code(), "invalid_request");
        assert!(Error::ValidationError("x".into()).is_client_error());
        assert_eq!(Error::PersistenceError("x".into()).code(), "persistence_failure");
        assert_eq!(Error::Timeout(10).code(), "timeout");
        assert!(!Error::Timeout(10).is_client_error());
        assert_eq!(Error::Other("x".into()).code(), "internal_error");
    }
}
