use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncWriteExt};

use vt_core::{FileUploadOptions, TransferStep, TunnelError};

use super::VmSession;
use crate::handler::ClientHandler;

impl VmSession {
    /// Stream `reader` into a remote file.
    ///
    /// The SFTP client is created on the first upload and reused afterwards.
    /// With `create_dirs`, missing parent directories are created first.
    /// Non-zero `permissions` are applied after the content is written.
    pub async fn upload_file<R>(&mut self, reader: R, options: &FileUploadOptions) -> Result<(), TunnelError>
    where
        R: AsyncRead + Unpin + Send,
    {
        if !options.remote_path.starts_with('/') {
            return Err(TunnelError::InvalidInput(format!(
                "remote path must be absolute: {:?}",
                options.remote_path
            )));
        }

        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TunnelError::Cancelled { operation: "file upload" }),
            result = self.upload(reader, options) => result,
        }
    }

    /// Upload an in-memory buffer; see [`VmSession::upload_file`]
    pub async fn upload_bytes(&mut self, data: &[u8], options: &FileUploadOptions) -> Result<(), TunnelError> {
        self.upload_file(data, options).await
    }

    async fn upload<R>(&mut self, mut reader: R, options: &FileUploadOptions) -> Result<(), TunnelError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let path = options.remote_path.as_str();
        let vm = self.config.vm_name.clone();
        let sftp = self.sftp_client(path).await?;

        if options.create_dirs {
            create_dir_all(sftp, remote_parent(path)).await?;
        }

        let mut file = sftp
            .create(path)
            .await
            .map_err(|e| TunnelError::transfer(TransferStep::CreateFile, path, e))?;

        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| TunnelError::transfer(TransferStep::Write, path, e))?;
        file.shutdown()
            .await
            .map_err(|e| TunnelError::transfer(TransferStep::Write, path, e))?;

        if options.permissions != 0 {
            // Only the permission bits; size, owner and times stay untouched
            let attrs = FileAttributes {
                permissions: Some(options.permissions),
                ..FileAttributes::empty()
            };
            sftp.set_metadata(path, attrs)
                .await
                .map_err(|e| TunnelError::transfer(TransferStep::Chmod, path, e))?;
        }

        tracing::info!(
            vm = %vm,
            path = %path,
            bytes = written,
            mode = format_args!("{:o}", options.permissions),
            "Uploaded file"
        );
        Ok(())
    }

    async fn sftp_client(&mut self, path: &str) -> Result<&SftpSession, TunnelError> {
        let sftp = match self.sftp.take() {
            Some(sftp) => sftp,
            None => open_sftp(&self.handle)
                .await
                .map_err(|reason| TunnelError::transfer(TransferStep::Subsystem, path, reason))?,
        };
        Ok(self.sftp.insert(sftp))
    }
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<SftpSession, String> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| format!("failed to open channel: {}", e))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| format!("failed to request subsystem: {}", e))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| e.to_string())
}

/// `mkdir -p` over SFTP
async fn create_dir_all(sftp: &SftpSession, dir: &str) -> Result<(), TunnelError> {
    for ancestor in ancestor_dirs(dir) {
        match sftp.metadata(ancestor.as_str()).await {
            Ok(attrs) if attrs.is_dir() => continue,
            Ok(_) => {
                return Err(TunnelError::transfer(
                    TransferStep::CreateDir,
                    ancestor,
                    "path exists and is not a directory",
                ))
            }
            Err(_) => {}
        }

        if let Err(e) = sftp.create_dir(ancestor.as_str()).await {
            // Lost a race with a concurrent creator
            let exists = matches!(sftp.metadata(ancestor.as_str()).await, Ok(attrs) if attrs.is_dir());
            if !exists {
                return Err(TunnelError::transfer(TransferStep::CreateDir, ancestor, e));
            }
        }
    }
    Ok(())
}

/// Parent directory of a remote POSIX path; `/` for top-level entries
pub fn remote_parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Every directory from the root down to `dir`, excluding `/` itself.
///
/// `/a//b/` yields `["/a", "/a/b"]`.
pub fn ancestor_dirs(dir: &str) -> Vec<String> {
    let mut current = String::new();
    dir.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_parent() {
        assert_eq!(remote_parent("/tmp/cloudinit-script.sh"), "/tmp");
        assert_eq!(remote_parent("/opt/app/bin/run"), "/opt/app/bin");
        assert_eq!(remote_parent("/file"), "/");
        assert_eq!(remote_parent("/dir/"), "/");
    }

    #[test]
    fn test_ancestor_dirs() {
        assert_eq!(ancestor_dirs("/opt/app/bin"), vec!["/opt", "/opt/app", "/opt/app/bin"]);
        assert_eq!(ancestor_dirs("/a//b/"), vec!["/a", "/a/b"]);
        assert!(ancestor_dirs("/").is_empty());
    }
}
