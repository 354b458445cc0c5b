//! Error handling for the mpxrx library
//!
//! A single error type covers the configuration boundary, the source
//! adapters and the run loop. Loss of carrier or timing lock is not an
//! error: it only shows up as degraded bits or audio.

use std::io;

use thiserror::Error;

/// A specialized Result type for mpxrx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mpxrx operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network, sinks)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected configuration; the previous configuration stays active
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown sample format or malformed input
    #[error("Format error: {0}")]
    Format(String),

    /// Malformed JSON configuration file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run loop was stopped through its cancel flag
    #[error("Processing cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a format error with a custom message
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_constructor() {
        let err = Error::config("sample rate must be positive");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: sample rate must be positive"
        );
    }

    #[test]
    fn test_format_error_constructor() {
        let err = Error::format("invalid format");
        assert!(matches!(err, Error::Format(_)));
        assert!(err.to_string().contains("Format error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
