//! Exec command implementation

use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vt_core::TunnelConfig;
use vt_session::VmSession;

use super::close_session;
use crate::output::{exit_code_byte, print_command_output};

/// Run one command on the VM and mirror its output and exit code
pub async fn exec_command(
    config: TunnelConfig,
    command: &[String],
    json: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let command = command.join(" ");
    let vm = config.vm_name.clone();

    let session = VmSession::open(config, cancel)
        .await
        .with_context(|| format!("Failed to open session to VM {}", vm))?;
    let result = session.execute_command(&command).await;
    close_session(session).await;

    let result = result.with_context(|| format!("Failed to run command on VM {}", vm))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_command_output(&result)?;
    }

    Ok(ExitCode::from(exit_code_byte(result.exit_code)))
}
