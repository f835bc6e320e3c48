//! Centralized error types for the Pi Monitor core library.
//!
//! Errors never travel back to whoever submitted a command. They are caught
//! at the boundary of the unit that failed (one command, one listener, one
//! module stop hook), logged, and dropped. The types here exist so that those
//! boundaries have something structured to log.

use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for log lines and bridges.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the orchestration engine.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MonitorError {
    /// The module could not be set up (missing dependency, disabled by config).
    #[error("Module {name} unavailable: {reason}")]
    ModuleUnavailable { name: String, reason: String },

    /// No module is registered or loaded under the given name.
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// A command handler failed while executing.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A command payload could not be interpreted for the requested verb.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The configuration source could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode for MonitorError {
    fn code(&self) -> &'static str {
        match self {
            Self::ModuleUnavailable { .. } => "module_unavailable",
            Self::ModuleNotFound(_) => "module_not_found",
            Self::CommandFailed(_) => "command_failed",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Config(_) => "configuration_error",
            Self::Io(_) => "io_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl MonitorError {
    /// Builds a [`MonitorError::ModuleUnavailable`] from a name and reason.
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Convenient Result alias for engine operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
