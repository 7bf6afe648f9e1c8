//! vt-session: SSH sessions to VMs over the controller tunnel
//!
//! A [`VmSession`] dials the controller's port-forward endpoint, runs an
//! SSH handshake over the WebSocket stream and exposes command execution,
//! script execution and SFTP uploads. The [`facade`] functions wrap a whole
//! open/use/close cycle for callers that provision VMs.

mod handler;

pub mod facade;
pub mod provision;
pub mod script;
pub mod session;

pub use facade::{probe_ready, run_script_once, upload_and_run, UPLOAD_SCRIPT_PATH};
pub use provision::ProvisionOutcome;
pub use session::VmSession;
