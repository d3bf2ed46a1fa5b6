//! Error types for xcvrd
//!
//! Per-port errors (hardware, parse, database) are contained at the port
//! record and drive retries. Only inventory and configuration errors stop
//! the daemon.

use thiserror::Error;

/// Module hardware access errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// Bus read or write failed
    #[error("I/O error on {bus}: {message}")]
    Io { bus: String, message: String },

    /// Access did not complete within the read timeout
    #[error("Hardware access on {bus} timed out after {timeout_ms}ms")]
    Timeout { bus: String, timeout_ms: u64 },

    /// No device is known at this bus address
    #[error("Unknown bus address: {0}")]
    UnknownBus(String),
}

impl HardwareError {
    /// Creates an I/O error.
    pub fn io(bus: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            bus: bus.into(),
            message: message.into(),
        }
    }

    /// Stable short name, published in status fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HardwareError::Io { .. } => "io_error",
            HardwareError::Timeout { .. } => "timeout",
            HardwareError::UnknownBus(_) => "unknown_bus",
        }
    }
}

/// Page decoding errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Page is shorter than the family layout requires
    #[error("Page truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Module family hint is not one we know how to decode
    #[error("Unsupported module family: {0}")]
    UnsupportedFamily(String),

    /// Text-encoded page could not be decoded
    #[error("Invalid page encoding: {0}")]
    Encoding(String),
}

impl ParseError {
    /// Stable short name, published in status fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::Truncated { .. } => "truncated",
            ParseError::UnsupportedFamily(_) => "unsupported_family",
            ParseError::Encoding(_) => "encoding",
        }
    }
}

/// State database errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Backend is not reachable
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// Redis command failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Failure while reading and decoding a module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ModuleError {
    /// Stable short name, published in status fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleError::Hardware(e) => e.kind(),
            ModuleError::Parse(e) => e.kind(),
        }
    }
}

/// Transceiver daemon errors
#[derive(Error, Debug)]
pub enum XcvrdError {
    /// Two inventory entries share one (subsystem, instance) key
    #[error("Inventory conflict: duplicate port {subsystem}/{instance}")]
    InventoryConflict { subsystem: String, instance: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No port is registered under this key
    #[error("Unknown port: {0}")]
    UnknownPort(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Debug dump could not be rendered
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for xcvrd operations
pub type Result<T> = std::result::Result<T, XcvrdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XcvrdError::InventoryConflict {
            subsystem: "base".to_string(),
            instance: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Inventory conflict: duplicate port base/1");
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::Truncated {
            expected: 128,
            actual: 64,
        };
        assert_eq!(err.to_string(), "Page truncated: expected 128 bytes, got 64");
    }

    #[test]
    fn test_module_error_kind() {
        let err: ModuleError = HardwareError::io("i2c-3", "nack").into();
        assert_eq!(err.kind(), "io_error");

        let err: ModuleError = ParseError::UnsupportedFamily("CFP2".to_string()).into();
        assert_eq!(err.kind(), "unsupported_family");
    }

    #[test]
    fn test_timeout_display() {
        let err = HardwareError::Timeout {
            bus: "i2c-3".to_string(),
            timeout_ms: 200,
        };
        assert!(err.to_string().contains("200ms"));
        assert_eq!(err.kind(), "timeout");
    }
}
