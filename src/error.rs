//! Error handling for the power station
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the application.
//!
//! Errors fall into three classes that the session treats differently:
//!
//! - **Connection-class** ([`StationError::Connection`], [`StationError::Socket`],
//!   [`StationError::NotConnected`]): retried by the connection manager, never
//!   surfaced past it.
//! - **Peripheral-class** ([`StationError::Peripheral`], [`StationError::Timeout`],
//!   [`StationError::Protocol`]): logged, the affected binding or report is
//!   abandoned for that attempt.
//! - **I/O** ([`StationError::Io`]): log file failures, propagated to the driving loop.

use std::fmt;
use thiserror::Error;

/// Error code carried in the flags byte of a hub response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    /// The device rejected a parameter
    InvalidParameter,
    /// The device does not implement the function
    FunctionNotSupported,
    /// Any other non-zero code
    Unknown(u8),
}

impl DeviceErrorCode {
    /// Decode the two-bit error field, `None` for success
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => None,
            1 => Some(DeviceErrorCode::InvalidParameter),
            2 => Some(DeviceErrorCode::FunctionNotSupported),
            other => Some(DeviceErrorCode::Unknown(other)),
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceErrorCode::InvalidParameter => write!(f, "invalid parameter"),
            DeviceErrorCode::FunctionNotSupported => write!(f, "function not supported"),
            DeviceErrorCode::Unknown(code) => write!(f, "unknown error ({})", code),
        }
    }
}

/// Main error type for power station operations
#[derive(Error, Debug)]
pub enum StationError {
    /// The transport refused or lost the link to the hub
    #[error("Connection error: {0}")]
    Connection(String),

    /// Socket-level failure while talking to the hub
    #[error("Socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// An operation needed a link but none is established
    #[error("Not connected to hub")]
    NotConnected,

    /// A device answered with a non-zero error code
    #[error("Device {uid} rejected function {function_id}: {code}")]
    Peripheral {
        uid: String,
        function_id: u8,
        code: DeviceErrorCode,
    },

    /// A device did not answer within the response timeout
    #[error("Timeout waiting for device {uid} function {function_id}")]
    Timeout { uid: String, function_id: u8 },

    /// A packet or payload could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A bounded retry policy gave up
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<StationError>,
    },

    /// IO errors (log file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StationError>,
    },
}

impl StationError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StationError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers down to the underlying error
    pub fn root(&self) -> &StationError {
        match self {
            StationError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Errors the connection manager retries instead of propagating
    pub fn is_connection_class(&self) -> bool {
        matches!(
            self.root(),
            StationError::Connection(_) | StationError::Socket(_) | StationError::NotConnected
        )
    }

    /// Errors that abandon a single binding or report
    pub fn is_peripheral_class(&self) -> bool {
        matches!(
            self.root(),
            StationError::Peripheral { .. } | StationError::Timeout { .. } | StationError::Protocol(_)
        )
    }

    /// Log file errors
    pub fn is_io(&self) -> bool {
        matches!(self.root(), StationError::Io(_))
    }
}

/// Result type alias for power station operations
pub type Result<T> = std::result::Result<T, StationError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
