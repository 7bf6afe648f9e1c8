//! Run-script command implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vt_core::TunnelConfig;
use vt_session::{run_script_once, upload_and_run, ProvisionOutcome};

use super::UNREACHABLE_EXIT_CODE;
use crate::output::{exit_code_byte, print_command_output, print_error, print_info, print_success};

/// Parse a `KEY=VALUE` pair; the value may itself contain `=`
pub fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

/// Run a local script file on the VM, piped or uploaded
pub async fn run_script_command(
    config: TunnelConfig,
    script_path: &Path,
    env: Vec<(String, String)>,
    upload: bool,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let script = tokio::fs::read_to_string(script_path)
        .await
        .with_context(|| format!("Failed to read script {:?}", script_path))?;
    let env: BTreeMap<String, String> = env.into_iter().collect();
    let vm = config.vm_name.clone();

    tracing::info!(vm = %vm, upload, vars = env.len(), "Running script");
    let result = if upload {
        upload_and_run(config, &script, &env, cancel).await
    } else {
        run_script_once(config, &script, &env, cancel).await
    };

    if let Ok(output) = &result {
        print_command_output(output)?;
    }

    let code = match ProvisionOutcome::from_result(&result) {
        ProvisionOutcome::Completed => {
            print_success(&format!("Script completed on VM {}", vm));
            ExitCode::SUCCESS
        }
        ProvisionOutcome::ScriptFailed { exit_code, message } => {
            print_error(&message);
            ExitCode::from(exit_code_byte(exit_code))
        }
        ProvisionOutcome::Unreachable { message, retryable } => {
            print_error(&message);
            if retryable {
                print_info("The VM may not be ready yet; try again later");
            }
            ExitCode::from(UNREACHABLE_EXIT_CODE)
        }
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("FOO=bar").unwrap(),
            ("FOO".to_string(), "bar".to_string())
        );
        assert_eq!(
            parse_env_pair("URL=http://x/?a=b").unwrap(),
            ("URL".to_string(), "http://x/?a=b".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=value").is_err());
    }
}
