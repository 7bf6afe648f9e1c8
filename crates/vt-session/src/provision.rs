//! Interpreting a provisioning run for status reporting

use serde::Serialize;

use vt_core::status::{truncate_message, MAX_STATUS_MESSAGE_LEN};
use vt_core::{CommandResult, TunnelError};

/// What a provisioning attempt means for the caller's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The script ran and exited 0
    Completed,
    /// The script ran and exited non-zero; terminal for this attempt
    ScriptFailed { exit_code: i32, message: String },
    /// The VM could not be reached or the session broke down
    Unreachable { message: String, retryable: bool },
}

impl ProvisionOutcome {
    /// Classify the result of [`crate::run_script_once`] or [`crate::upload_and_run`]
    pub fn from_result(result: &Result<CommandResult, TunnelError>) -> Self {
        match result {
            Ok(output) if output.success() => ProvisionOutcome::Completed,
            Ok(output) => ProvisionOutcome::ScriptFailed {
                exit_code: output.exit_code,
                message: truncate_message(
                    &format!("exit code {}: {}", output.exit_code, output.stderr),
                    MAX_STATUS_MESSAGE_LEN,
                ),
            },
            Err(e) => ProvisionOutcome::Unreachable {
                message: truncate_message(&format!("provisioning failed: {}", e), MAX_STATUS_MESSAGE_LEN),
                retryable: e.is_retryable(),
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ProvisionOutcome::Completed)
    }

    /// Whether the caller should requeue and try again later
    pub fn should_retry(&self) -> bool {
        matches!(self, ProvisionOutcome::Unreachable { retryable: true, .. })
    }

    /// Status message, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            ProvisionOutcome::Completed => None,
            ProvisionOutcome::ScriptFailed { message, .. }
            | ProvisionOutcome::Unreachable { message, .. } => Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stderr: &str) -> Result<CommandResult, TunnelError> {
        Ok(CommandResult {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    #[test]
    fn test_zero_exit_completes() {
        let outcome = ProvisionOutcome::from_result(&output(0, "warning"));
        assert!(outcome.is_completed());
        assert_eq!(outcome.message(), None);
        assert!(!outcome.should_retry());
    }

    #[test]
    fn test_non_zero_exit_is_script_failure() {
        let outcome = ProvisionOutcome::from_result(&output(3, "apt-get: not found"));
        assert_eq!(
            outcome,
            ProvisionOutcome::ScriptFailed {
                exit_code: 3,
                message: "exit code 3: apt-get: not found".into(),
            }
        );
        assert!(!outcome.should_retry());
    }

    #[test]
    fn test_error_is_unreachable_and_retryable() {
        let result = Err(TunnelError::VmNotReady {
            vm: "vm-1".into(),
            status: 404,
        });
        let outcome = ProvisionOutcome::from_result(&result);
        assert!(outcome.should_retry());
        assert!(outcome.message().unwrap().starts_with("provisioning failed: "));
    }

    #[test]
    fn test_auth_failure_is_not_retried() {
        let result = Err(TunnelError::AuthFailed {
            user: "admin".into(),
            reason: "password rejected".into(),
        });
        let outcome = ProvisionOutcome::from_result(&result);
        assert!(matches!(outcome, ProvisionOutcome::Unreachable { retryable: false, .. }));
    }

    #[test]
    fn test_long_stderr_is_capped() {
        let stderr = "x".repeat(5000);
        let outcome = ProvisionOutcome::from_result(&output(1, &stderr));
        let message = outcome.message().unwrap();
        assert_eq!(message.len(), MAX_STATUS_MESSAGE_LEN);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let outcome = ProvisionOutcome::from_result(&output(0, ""));
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"outcome":"completed"}"#);
    }
}
