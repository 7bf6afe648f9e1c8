//! Core error types for vm-tunnel

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for tunnel, session and facade operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The controller base URL could not be turned into a WebSocket URL
    #[error("invalid controller URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The target VM does not exist (yet) or is not reachable through the controller
    #[error("VM is not ready: VM {vm:?} not found (HTTP {status})")]
    VmNotReady { vm: String, status: u16 },

    /// The controller could not reach the worker hosting the VM
    #[error("failed to connect to controller: worker for VM {vm:?} is unreachable (HTTP {status})")]
    WorkerUnreachable { vm: String, status: u16 },

    /// The controller rejected the requested port
    #[error("failed to connect to controller: invalid port {port} specified (HTTP {status})")]
    InvalidPort { port: u16, status: u16 },

    /// Any other failure establishing the tunnel transport
    #[error("failed to connect to controller: {reason}")]
    ConnectionFailed { reason: String, status: Option<u16> },

    /// The SSH server rejected the credentials
    #[error("SSH authentication failed for user {user:?}: {reason}")]
    AuthFailed { user: String, reason: String },

    /// The SSH handshake failed for a reason other than authentication
    #[error("failed to establish SSH connection: {0}")]
    Handshake(String),

    /// An operation exceeded its deadline
    #[error("operation timed out: {operation} did not complete within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The caller's cancellation token fired
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: &'static str },

    /// Opening an exec channel or running a command failed at the transport level
    #[error("command execution failed: {0}")]
    Exec(String),

    /// An SFTP step failed
    #[error("SFTP operation failed: {step} {path:?}: {reason}")]
    TransferFailed {
        step: TransferStep,
        path: String,
        reason: String,
    },

    /// Arguments were rejected before any network activity
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// One or more resources failed to close
    #[error("errors during close: {}", .0.join("; "))]
    Close(Vec<String>),

    /// I/O error on the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Programmatic failure class of a [`TunnelError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not establish the tunnel transport
    ConnectionFailed,
    /// Target VM not found or not yet reachable
    VmNotReady,
    /// SSH credentials rejected
    AuthFailed,
    /// Deadline exceeded
    Timeout,
    /// SFTP sub-protocol failure
    TransferFailed,
    /// Cancelled by the caller
    Cancelled,
    /// SSH handshake failure other than authentication
    Ssh,
    /// Command execution failure (not a non-zero exit)
    Exec,
    /// Rejected arguments
    InvalidInput,
    /// Teardown failure
    Close,
}

impl TunnelError {
    /// Get the failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunnelError::VmNotReady { .. } => ErrorKind::VmNotReady,
            TunnelError::InvalidUrl { .. }
            | TunnelError::WorkerUnreachable { .. }
            | TunnelError::InvalidPort { .. }
            | TunnelError::ConnectionFailed { .. }
            | TunnelError::Io(_) => ErrorKind::ConnectionFailed,
            TunnelError::AuthFailed { .. } => ErrorKind::AuthFailed,
            TunnelError::Handshake(_) => ErrorKind::Ssh,
            TunnelError::Timeout { .. } => ErrorKind::Timeout,
            TunnelError::Cancelled { .. } => ErrorKind::Cancelled,
            TunnelError::Exec(_) => ErrorKind::Exec,
            TunnelError::TransferFailed { .. } => ErrorKind::TransferFailed,
            TunnelError::InvalidInput(_) => ErrorKind::InvalidInput,
            TunnelError::Close(_) => ErrorKind::Close,
        }
    }

    /// Whether a reconciliation loop should retry the operation later.
    ///
    /// Misconfiguration (bad URL, bad port, bad input) and rejected
    /// credentials will not fix themselves by waiting.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TunnelError::InvalidUrl { .. }
                | TunnelError::InvalidPort { .. }
                | TunnelError::InvalidInput(_)
                | TunnelError::AuthFailed { .. }
        )
    }

    /// Build an SFTP failure for `path`
    pub fn transfer(step: TransferStep, path: impl Into<String>, reason: impl fmt::Display) -> Self {
        TunnelError::TransferFailed {
            step,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// The SFTP step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    /// Opening the SFTP subsystem
    Subsystem,
    /// Creating a parent directory
    CreateDir,
    /// Creating or truncating the destination file
    CreateFile,
    /// Streaming content into the destination file
    Write,
    /// Applying permission bits
    Chmod,
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            TransferStep::Subsystem => "open subsystem",
            TransferStep::CreateDir => "create directory",
            TransferStep::CreateFile => "create file",
            TransferStep::Write => "write file content",
            TransferStep::Chmod => "set file permissions",
        };
        f.write_str(step)
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
