//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Admission decisions never produce an error; these variants only surface
/// while policies and configuration are being set up, or from the host server.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Invalid policy or configuration content
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while assembling configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
