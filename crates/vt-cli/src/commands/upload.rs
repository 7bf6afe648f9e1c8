//! Upload command implementation

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vt_core::{FileUploadOptions, TunnelConfig};
use vt_session::VmSession;

use super::close_session;
use crate::output::print_success;

/// Parse permission bits given in octal, with or without a `0o` prefix
pub fn parse_mode(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("expected octal permission bits like 755, got {:?}", s)),
    }
}

/// Upload a local file to the VM
pub async fn upload_command(
    config: TunnelConfig,
    local: &Path,
    options: FileUploadOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("Failed to open {:?}", local))?;
    let vm = config.vm_name.clone();

    let mut session = VmSession::open(config, cancel)
        .await
        .with_context(|| format!("Failed to open session to VM {}", vm))?;
    let result = session.upload_file(file, &options).await;
    close_session(session).await;

    result.with_context(|| format!("Failed to upload {:?} to {}:{}", local, vm, options.remote_path))?;
    print_success(&format!("Uploaded {} to {}:{}", local.display(), vm, options.remote_path));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert_eq!(parse_mode("0644"), Ok(0o644));
        assert_eq!(parse_mode("0o600"), Ok(0o600));
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("rwx").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
