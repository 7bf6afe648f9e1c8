//! vt-core: Core abstractions and configuration for vm-tunnel
//!
//! This crate provides the shared types, the error taxonomy, configuration
//! and transport traits used by the tunnel, session and CLI crates.

pub mod config;
pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use config::TunnelConfig;
pub use error::{ErrorKind, TransferStep, TunnelError};
pub use traits::{DuplexTransport, TransportCloser};
pub use types::{CommandResult, FileUploadOptions};
