//! Error types for rangefetch
//!
//! Provides the error taxonomy shared by the orchestrator, the transports and
//! the front ends (CLI and C bindings).

use std::fmt;

/// Main error type for rangefetch operations
#[derive(Debug)]
pub enum Error {
    /// URL rejected by the transport or not a supported scheme
    InvalidUrl(String),

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// A buffer or request handle could not be allocated
    Allocation(String),

    /// Body planning was attempted before a length was discovered
    UnknownContentLength,

    /// The transport reported a hard failure while stepping
    TransportError(String),

    /// HTTP-specific error
    HttpError(String),

    /// Network connectivity issues
    NetworkError(String),

    /// The download ended without delivering the resource
    DownloadFailed(String),

    /// File I/O error
    IoError(std::io::Error),

    /// The session was already destroyed
    SessionClosed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidUrl(url) => {
                write!(f, "Invalid URL: {}", url)
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
            Error::Allocation(msg) => {
                write!(f, "Allocation failed: {}", msg)
            }
            Error::UnknownContentLength => {
                write!(f, "Content length is unknown, cannot plan body requests")
            }
            Error::TransportError(msg) => {
                write!(f, "Transport error: {}", msg)
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {}", msg)
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {}", msg)
            }
            Error::DownloadFailed(msg) => {
                write!(f, "Download failed: {}", msg)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
            Error::SessionClosed => {
                write!(f, "Session already destroyed")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed configuration: {err}"))
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::Allocation(err.to_string())
    }
}

impl Error {
    /// Whether the error came from the network side rather than local state
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::HttpError(_) | Error::TransportError(_)
        )
    }
}

/// Convenience result type for rangefetch operations
pub type Result<T> = std::result::Result<T, Error>;
