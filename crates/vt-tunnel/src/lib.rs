//! vt-tunnel: WebSocket port-forward transport for vm-tunnel
//!
//! This crate dials the controller's port-forward endpoint for a VM and
//! exposes the resulting WebSocket as an ordered, bidirectional byte
//! stream that an SSH client can run over.

pub mod dial;
pub mod stream;

pub use dial::{build_websocket_url, classify_status, dial, CLIENT_USER_AGENT};
pub use stream::{StreamCloser, WsStream};
