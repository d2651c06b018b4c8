//! Error handling module for the stackmap data plane
//!
//! Only setup and control paths return these errors. Back-pressure and
//! topology outcomes of a flush are reported through
//! [`FlushOutcome`](crate::flush::FlushOutcome) instead.

use alloc::string::{String, ToString};
use core::fmt;

/// Common error type used throughout nos-stackmap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    InvalidArgument(String),
    /// Invalid state
    InvalidState(String),
    /// Resource not found
    NotFound(String),
    /// Resource busy
    Busy(String),
    /// Out of memory
    OutOfMemory,
    /// Resource exhausted
    ResourceExhausted(String),
    /// Configuration error
    ConfigError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Busy(msg) => write!(f, "Resource busy: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Creates a new resource exhausted error
pub fn exhausted(msg: &str) -> Error {
    Error::ResourceExhausted(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", Error::InvalidArgument("head beyond tail".to_string())),
            "Invalid argument: head beyond tail"
        );
        assert_eq!(format!("{}", Error::OutOfMemory), "Out of memory");
        assert_eq!(
            format!("{}", exhausted("reserve pool")),
            "Resource exhausted: reserve pool"
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(exhausted("x"), Error::ResourceExhausted("x".to_string()));
        assert_ne!(
            Error::InvalidState("x".to_string()),
            Error::InvalidArgument("x".to_string())
        );
    }
}
