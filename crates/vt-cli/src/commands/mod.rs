//! CLI command implementations

mod exec;
mod probe;
mod script;
mod upload;

pub use exec::exec_command;
pub use probe::probe_command;
pub use script::{parse_env_pair, run_script_command};
pub use upload::{parse_mode, upload_command};

use vt_session::VmSession;

use crate::output::print_warning;

/// Exit code used when the VM could not be reached at all, as ssh does
pub const UNREACHABLE_EXIT_CODE: u8 = 255;

/// Close a session, downgrading a close failure to a warning
async fn close_session(session: VmSession) {
    if let Err(e) = session.close().await {
        print_warning(&format!("Session did not close cleanly: {}", e));
    }
}
