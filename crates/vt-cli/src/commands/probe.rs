//! Probe command implementation

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use vt_core::TunnelConfig;
use vt_session::probe_ready;

use crate::output::{print_success, print_warning};

/// Check whether SSH on the VM is usable
pub async fn probe_command(config: TunnelConfig, cancel: &CancellationToken) -> ExitCode {
    let vm = config.vm_name.clone();

    if probe_ready(config, cancel).await {
        print_success(&format!("VM {} is ready", vm));
        ExitCode::SUCCESS
    } else {
        print_warning(&format!("VM {} is not ready yet", vm));
        ExitCode::FAILURE
    }
}
