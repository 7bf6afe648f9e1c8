//! One-shot operations: open a session, do one thing, always close
//!
//! These are what a reconciliation loop calls. No session outlives the
//! call, and a failure to close never replaces the operation's own result.

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use vt_core::{CommandResult, FileUploadOptions, TunnelConfig, TunnelError};

use crate::script;
use crate::session::VmSession;

/// Where [`upload_and_run`] places the script on the VM
pub const UPLOAD_SCRIPT_PATH: &str = "/tmp/cloudinit-script.sh";

const UPLOAD_SCRIPT_MODE: u32 = 0o755;

/// Command run by [`probe_ready`]
const PROBE_COMMAND: &str = "ls -al";

/// Open a session, pipe `script` to bash with `env` exported, then close.
pub async fn run_script_once(
    config: TunnelConfig,
    script: &str,
    env: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<CommandResult, TunnelError> {
    script::validate_env(env)?;

    let session = VmSession::open(config, cancel).await?;
    let result = session.execute_script(script, env).await;
    finish(session, result).await
}

/// Open a session, upload `script` as an executable file, run it with
/// `env` exported, then close.
///
/// Large scripts are more reliable executed from a file than piped on
/// stdin; the result has the same shape as [`run_script_once`].
pub async fn upload_and_run(
    config: TunnelConfig,
    script: &str,
    env: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<CommandResult, TunnelError> {
    let command = script::export_prefixed(UPLOAD_SCRIPT_PATH, env)?;
    let options = FileUploadOptions::new(UPLOAD_SCRIPT_PATH)
        .mode(UPLOAD_SCRIPT_MODE)
        .parents();

    let mut session = VmSession::open(config, cancel).await?;
    let result = async {
        session.upload_bytes(script.as_bytes(), &options).await?;
        session.execute_command(&command).await
    }
    .await;
    finish(session, result).await
}

/// Whether SSH on the VM is usable: a session opens and `ls -al` exits 0.
///
/// Every failure reads as "not ready yet".
pub async fn probe_ready(config: TunnelConfig, cancel: &CancellationToken) -> bool {
    let vm = config.vm_name.clone();

    let session = match VmSession::open(config, cancel).await {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(vm = %vm, "VM not ready: {}", e);
            return false;
        }
    };

    let result = session.execute_command(PROBE_COMMAND).await;
    match finish(session, result).await {
        Ok(output) if output.success() => true,
        Ok(output) => {
            tracing::debug!(vm = %vm, exit_code = output.exit_code, "Readiness probe failed");
            false
        }
        Err(e) => {
            tracing::debug!(vm = %vm, "Readiness probe failed: {}", e);
            false
        }
    }
}

async fn finish<T>(session: VmSession, result: Result<T, TunnelError>) -> Result<T, TunnelError> {
    let vm = session.config().vm_name.clone();
    if let Err(e) = session.close().await {
        tracing::warn!(vm = %vm, "Failed to close VM session: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_env() -> BTreeMap<String, String> {
        BTreeMap::from([("NOT VALID".to_string(), "x".to_string())])
    }

    // Invalid input must be rejected before anything is dialed; the URL
    // here would fail to parse if it were ever used.
    #[tokio::test]
    async fn test_invalid_env_fails_before_dialing() {
        let config = TunnelConfig::new("://unused", "vm");
        let cancel = CancellationToken::new();

        let err = run_script_once(config.clone(), "true", &bad_env(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidInput(_)));

        let err = upload_and_run(config, "true", &bad_env(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_as_not_ready() {
        let config = TunnelConfig::new("://unused", "vm");
        assert!(!probe_ready(config, &CancellationToken::new()).await);
    }
}
