//! vm-tunnel CLI
//!
//! Provides the `vm-tunnel` binary: a thin front-end that resolves a
//! tunnel configuration and calls into `vt-session`.

pub mod commands;
pub mod connection;
pub mod output;
