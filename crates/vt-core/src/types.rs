//! Core domain types

use serde::{Deserialize, Serialize};

/// Output of one executed command or script.
///
/// A non-zero `exit_code` is a normal result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit status of the remote process (0 = success)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandResult {
    /// Whether the remote process exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options for uploading a file to the VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUploadOptions {
    /// Absolute destination path on the VM
    pub remote_path: String,
    /// Permission bits applied after the write (0 = leave as created)
    pub permissions: u32,
    /// Create missing parent directories first
    pub create_dirs: bool,
}

impl FileUploadOptions {
    /// Upload to `remote_path` without changing permissions or creating directories
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            permissions: 0,
            create_dirs: false,
        }
    }

    /// Set the permission bits applied after the write
    pub fn mode(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Create missing parent directories
    pub fn parents(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_is_not_success() {
        let result = CommandResult {
            exit_code: 42,
            stdout: "hello\n".into(),
            stderr: String::new(),
        };
        assert!(!result.success());
        assert!(CommandResult::default().success());
    }

    #[test]
    fn test_upload_options_builder() {
        let opts = FileUploadOptions::new("/tmp/test.sh").mode(0o755).parents();
        assert_eq!(opts.remote_path, "/tmp/test.sh");
        assert_eq!(opts.permissions, 0o755);
        assert!(opts.create_dirs);
    }

    #[test]
    fn test_command_result_json_shape() {
        let result = CommandResult {
            exit_code: 1,
            stdout: "out".into(),
            stderr: "err".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["exit_code"], 1);
        assert_eq!(json["stderr"], "err");
    }
}
