//! Error types for SurfChan

use thiserror::Error;

/// Result type for SurfChan operations
pub type Result<T> = std::result::Result<T, SurfError>;

/// Reasons a received frame could not be decoded.
///
/// None of these are fatal to a session: the dispatcher logs the error and
/// keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Empty or whitespace-only input
    #[error("empty frame")]
    Empty,

    /// No kind separator, or bytes that are not UTF-8
    #[error("malformed frame: {0}")]
    MalformedFormat(String),

    /// Kind ordinal is not an integer or is outside the known kinds
    #[error("unknown frame kind: {0}")]
    UnknownKind(String),
}

/// SurfChan error types
#[derive(Debug, Error)]
pub enum SurfError {
    /// Socket or channel failure
    #[error("IPC error: {0}")]
    IpcError(String),

    /// Peer or caller broke the lock-step protocol
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Telemetry payload did not match the expected schema
    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    /// Game process could not be launched or terminated
    #[error("Process error: {0}")]
    ProcessError(String),

    /// Config or map files could not be staged
    #[error("Asset error: {0}")]
    AssetError(String),

    /// Invalid or missing configuration
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Window lookup or screen grab failed
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// The bridge was torn down while the operation was waiting
    #[error("Operation cancelled by bridge shutdown")]
    Cancelled,
}

