//! Error types for the virtual camera engine

use std::io;
use thiserror::Error;

/// Result type alias using VcamError
pub type Result<T> = std::result::Result<T, VcamError>;

/// Failures reported by the host registry while publishing devices and streams.
///
/// Any of these at startup is fatal: the service has nothing to offer without
/// its device registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A device with the same identifier is already registered
    #[error("device {0} is already registered")]
    DuplicateDevice(String),

    /// A stream with the same identifier is already registered
    #[error("stream {0} is already registered")]
    DuplicateStream(String),

    /// Stream added to a device the host does not know about
    #[error("device {0} is not registered")]
    UnknownDevice(String),

    /// Host refused the object
    #[error("host rejected registration: {0}")]
    Rejected(String),
}

/// Engine error types
#[derive(Debug, Error)]
pub enum VcamError {
    /// Every pooled buffer is currently outstanding
    #[error("frame pool exhausted ({outstanding} of {threshold} buffers outstanding)")]
    PoolExhausted { outstanding: usize, threshold: usize },

    /// Active format index outside the supported format list
    #[error("format index {index} out of range (stream supports {count} format(s))")]
    InvalidFormatIndex { index: usize, count: usize },

    /// Host registration failure
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// Device lookup failed
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Stream lookup failed
    #[error("unknown stream: {0}")]
    UnknownStream(String),

    /// Admission hook refused the client
    #[error("client {0} is not authorized to start the stream")]
    NotAuthorized(String),

    /// Configuration values that cannot drive a device
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration source error
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Operation on a device that has been shut down
    #[error("device has been shut down")]
    ShutDown,
}

impl VcamError {
    /// Whether the failure only costs a frame and streaming continues
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VcamError::PoolExhausted { .. } | VcamError::InvalidFormatIndex { .. }
        )
    }
}
