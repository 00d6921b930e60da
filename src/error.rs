//! # Error Types
//!
//! Custom error types for the GNSS tracker using `thiserror`.

use thiserror::Error;

/// Main error type for the GNSS tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("Serial port not found (tried: {0})")]
    SerialPortNotFound(String),

    /// Malformed NMEA sentence
    #[error("NMEA error: {0}")]
    Nmea(String),

    /// Cellular modem command failures
    #[error("Modem error: {0}")]
    Modem(String),

    /// WiFi station failures
    #[error("WiFi error: {0}")]
    Wifi(String),

    /// HTTP transport failures (no status code received)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Device identity could not be derived
    #[error("Device identity unavailable: {0}")]
    Identity(String),

    /// Payload serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the GNSS tracker
pub type Result<T> = std::result::Result<T, TrackerError>;
