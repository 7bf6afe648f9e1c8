use std::collections::BTreeMap;

use russh::client::Msg;
use russh::{Channel, ChannelMsg, Sig};

use vt_core::{CommandResult, TunnelError};

use super::VmSession;
use crate::script::{self, SCRIPT_INTERPRETER};

/// Exit code reported for a signal without a known number
const UNKNOWN_SIGNAL_EXIT_CODE: i32 = 255;

impl VmSession {
    /// Run `command` verbatim on one fresh exec channel.
    ///
    /// A non-zero exit is a successful call; only channel or transport
    /// failures are errors.
    pub async fn execute_command(&self, command: &str) -> Result<CommandResult, TunnelError> {
        tracing::debug!(vm = %self.config.vm_name, "Executing command");
        self.run(command, None).await
    }

    /// Run `script` under bash with `env` exported first.
    ///
    /// The script body is fed on stdin, prefixed with `set -e` and one
    /// `export NAME='value'` line per variable in key order.
    pub async fn execute_script(
        &self,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandResult, TunnelError> {
        let body = script::build_script(script, env)?;
        tracing::debug!(
            vm = %self.config.vm_name,
            bytes = body.len(),
            vars = env.len(),
            "Executing script"
        );
        self.run(SCRIPT_INTERPRETER, Some(body.as_bytes())).await
    }

    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandResult, TunnelError> {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TunnelError::Cancelled { operation: "command execution" }),
            result = self.run_on_channel(command, stdin) => result,
        };

        if let Ok(output) = &result {
            tracing::debug!(vm = %self.config.vm_name, exit_code = output.exit_code, "Command finished");
        }
        result
    }

    async fn run_on_channel(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandResult, TunnelError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| TunnelError::Exec(format!("failed to open session channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| TunnelError::Exec(format!("failed to start command: {}", e)))?;

        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| TunnelError::Exec(format!("failed to send stdin: {}", e)))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| TunnelError::Exec(format!("failed to close stdin: {}", e)))?;

        collect_output(&mut channel).await
    }
}

/// Drain a channel until it closes.
///
/// Exit status may arrive before or after EOF, so only the channel closing
/// ends the loop.
async fn collect_output(channel: &mut Channel<Msg>) -> Result<CommandResult, TunnelError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(message) = channel.wait().await {
        match message {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => {
                exit_code = Some(i32::try_from(exit_status).unwrap_or(UNKNOWN_SIGNAL_EXIT_CODE));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                exit_code = Some(signal_exit_code(&signal_name));
            }
            ChannelMsg::Failure => {
                return Err(TunnelError::Exec("server refused to run the command".to_string()));
            }
            _ => {}
        }
    }

    let exit_code = exit_code.ok_or_else(|| {
        TunnelError::Exec("channel closed without an exit status".to_string())
    })?;

    Ok(CommandResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Shell convention for a process killed by a signal: 128 + signal number
fn signal_exit_code(signal: &Sig) -> i32 {
    let number = match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        _ => return UNKNOWN_SIGNAL_EXIT_CODE,
    };
    128 + number
}
