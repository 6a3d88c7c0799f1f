//! Error types for pagewatch-core

use std::time::Duration;

use thiserror::Error;

/// Main error type for the pagewatch-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery to the collection endpoint failed
    #[error("transmission error: {0}")]
    Transmit(#[from] TransmitError),
}

/// Result type alias for pagewatch-core
pub type Result<T> = std::result::Result<T, Error>;

/// Why a batch did not reach the collection endpoint.
///
/// Every variant is recoverable: the monitor retry-marks the attempted
/// items and tries again on the next flush.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransmitError {
    /// Connection refused, DNS failure, reset mid-request
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status
    #[error("HTTP {code}: {reason}")]
    Status { code: u16, reason: String },

    /// The request was aborted after the configured timeout
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The batch could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TransmitError {
    /// Short label used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            TransmitError::Network(_) => "network",
            TransmitError::Status { .. } => "status",
            TransmitError::Timeout(_) => "timeout",
            TransmitError::Serialization(_) => "serialization",
        }
    }
}
