//! Error types for the Floodgate service.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// Rejected requests are not errors: they surface as a
/// [`Decision`](crate::ratelimit::Decision) with `allowed == false`.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid limiter or server settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
