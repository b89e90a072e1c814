//! Error types for warden
//!
//! Provides a unified error type used across all warden crates. The
//! arbitration failures each map to one [`ErrorKind`], which is what
//! structured log entries carry in their `error_kind` field.

use std::fmt;
use std::path::PathBuf;

/// Taxonomy tag for a [`WardenError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgumentCombination,
    NoTargetSpecified,
    DelegationFailed,
    ProtocolViolation,
    UnexpectedChildBehavior,
    ChildProcessError,
    Io,
    Config,
    Extension,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgumentCombination => "InvalidArgumentCombination",
            Self::NoTargetSpecified => "NoTargetSpecified",
            Self::DelegationFailed => "DelegationFailed",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::UnexpectedChildBehavior => "UnexpectedChildBehavior",
            Self::ChildProcessError => "ChildProcessError",
            Self::Io => "Io",
            Self::Config => "Config",
            Self::Extension => "Extension",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for warden operations
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Arbitration Errors ===

    #[error("Invalid argument combination: {0}")]
    InvalidArgumentCombination(String),

    #[error("Please specify at least one file or folder")]
    NoTargetSpecified,

    #[error("Delegation to {address} failed: {reason}")]
    DelegationFailed { address: String, reason: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unexpected child behavior: {0}")]
    UnexpectedChildBehavior(String),

    #[error("Child process error: {0}")]
    ChildProcess(String),

    #[error("Handshake timeout after {millis}ms")]
    HandshakeTimeout { millis: u64 },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Extension Errors ===

    #[error("Extension error: {0}")]
    Extension(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Create an invalid argument combination error
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArgumentCombination(msg.into())
    }

    /// Create a delegation failure for the given socket address
    pub fn delegation(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::DelegationFailed {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an unexpected child behavior error
    pub fn unexpected_child(msg: impl Into<String>) -> Self {
        Self::UnexpectedChildBehavior(msg.into())
    }

    /// Create a child process error
    pub fn child_process(msg: impl Into<String>) -> Self {
        Self::ChildProcess(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an extension error
    pub fn extension(msg: impl Into<String>) -> Self {
        Self::Extension(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Taxonomy tag used in structured logs
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgumentCombination(_) => ErrorKind::InvalidArgumentCombination,
            Self::NoTargetSpecified => ErrorKind::NoTargetSpecified,
            Self::DelegationFailed { .. } => ErrorKind::DelegationFailed,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::UnexpectedChildBehavior(_) | Self::HandshakeTimeout { .. } => {
                ErrorKind::UnexpectedChildBehavior
            }
            Self::ChildProcess(_) => ErrorKind::ChildProcessError,
            Self::Io(_)
            | Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::Connection(_)
            | Self::ConnectionClosed => ErrorKind::Io,
            Self::Config(_) | Self::ConfigInvalid { .. } | Self::ConfigNotFound(_) => {
                ErrorKind::Config
            }
            Self::Extension(_) => ErrorKind::Extension,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if the invocation can recover from this error locally.
    ///
    /// Only a failed delegation is recoverable: the caller starts a fresh
    /// instance instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DelegationFailed { .. })
    }
}

/// Result type alias using WardenError
pub type Result<T> = std::result::Result<T, WardenError>;
