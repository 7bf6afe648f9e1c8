//! Authenticated SSH session over a tunnel transport
//!
//! A [`VmSession`] is one SSH client bound to one transport, plus an SFTP
//! client created on first upload. It is single-use: open, run some
//! commands or uploads, close.

mod exec;
mod sftp;

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use tokio_util::sync::CancellationToken;

use vt_core::traits::{DuplexTransport, TransportCloser};
use vt_core::{TunnelConfig, TunnelError};

use crate::handler::ClientHandler;

pub use sftp::{ancestor_dirs, remote_parent};

/// An authenticated SSH session to one VM
pub struct VmSession {
    config: TunnelConfig,
    handle: Handle<ClientHandler>,
    /// Created lazily by the first upload
    sftp: Option<SftpSession>,
    transport: Box<dyn TransportCloser>,
    /// Child of the token the session was opened with
    cancel: CancellationToken,
}

impl VmSession {
    /// Dial the controller for `config.vm_name` and authenticate over the tunnel.
    ///
    /// Defaults are applied to `config` first. Dialing is bounded by the
    /// controller wait budget plus the timeout, and the SSH handshake by the
    /// timeout alone. No partially opened session is ever returned: on
    /// failure the tunnel is closed before the error is reported.
    pub async fn open(config: TunnelConfig, cancel: &CancellationToken) -> Result<Self, TunnelError> {
        let config = config.with_defaults();
        let budget = Duration::from_secs(u64::from(config.wait_seconds)) + config.timeout;

        tracing::debug!(vm = %config.vm_name, port = config.ssh_port, "Opening VM session");

        let stream = match tokio::time::timeout(budget, vt_tunnel::dial(&config, cancel)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(TunnelError::Timeout {
                    operation: "dial controller",
                    after: budget,
                })
            }
        };

        Self::handshake(stream, config, cancel).await
    }

    /// Run the SSH handshake and password authentication over any transport.
    ///
    /// This is the second half of [`VmSession::open`]; it also accepts a
    /// direct TCP stream or an in-memory pipe.
    pub async fn handshake<T>(
        transport: T,
        config: TunnelConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, TunnelError>
    where
        T: DuplexTransport,
    {
        let config = config.with_defaults();
        let closer = transport.closer();

        match connect(transport, &config, cancel).await {
            Ok(handle) => {
                tracing::info!(vm = %config.vm_name, user = %config.ssh_username, "SSH session established");
                Ok(Self {
                    config,
                    handle,
                    sftp: None,
                    transport: closer,
                    cancel: cancel.child_token(),
                })
            }
            Err(e) => {
                if let Err(close_err) = closer.close().await {
                    tracing::debug!("Failed to close transport after handshake error: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Configuration the session was opened with, defaults applied
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Close the SFTP client, the SSH connection and the transport, in that order.
    ///
    /// Every step runs even if an earlier one fails; all failures are
    /// reported together.
    pub async fn close(self) -> Result<(), TunnelError> {
        let mut errors = Vec::new();

        if let Some(sftp) = self.sftp {
            if let Err(e) = sftp.close().await {
                errors.push(format!("sftp: {}", e));
            }
        }

        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            errors.push(format!("ssh: {}", e));
        }

        if let Err(e) = self.transport.close().await {
            errors.push(format!("transport: {}", e));
        }

        tracing::debug!(vm = %self.config.vm_name, errors = errors.len(), "VM session closed");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TunnelError::Close(errors))
        }
    }
}

async fn connect<T>(
    transport: T,
    config: &TunnelConfig,
    cancel: &CancellationToken,
) -> Result<Handle<ClientHandler>, TunnelError>
where
    T: DuplexTransport,
{
    let ssh_config = Arc::new(client::Config::default());
    let handler = ClientHandler::new(config.vm_name.clone());

    let establish = async {
        let mut handle = client::connect_stream(ssh_config, transport, handler)
            .await
            .map_err(|e| classify_handshake_error(config, &e.to_string()))?;

        let authenticated = handle
            .authenticate_password(config.ssh_username.as_str(), config.ssh_password.as_str())
            .await
            .map_err(|e| classify_handshake_error(config, &e.to_string()))?;

        if !authenticated {
            return Err(TunnelError::AuthFailed {
                user: config.ssh_username.clone(),
                reason: "password rejected by server".to_string(),
            });
        }
        Ok(handle)
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TunnelError::Cancelled { operation: "SSH handshake" }),
        result = tokio::time::timeout(config.timeout, establish) => match result {
            Ok(result) => result,
            Err(_) => Err(TunnelError::Timeout {
                operation: "SSH handshake",
                after: config.timeout,
            }),
        },
    }
}

/// Map a handshake failure from the SSH library onto the error taxonomy.
///
/// russh reports some authentication failures only as text, so this is the
/// one place that inspects an error message.
fn classify_handshake_error(config: &TunnelConfig, message: &str) -> TunnelError {
    if is_auth_failure(message) {
        TunnelError::AuthFailed {
            user: config.ssh_username.clone(),
            reason: message.to_string(),
        }
    } else {
        TunnelError::Handshake(message.to_string())
    }
}

fn is_auth_failure(message: &str) -> bool {
    message.to_ascii_lowercase().contains("authenticat")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_core::ErrorKind;

    #[test]
    fn test_auth_signature_is_matched() {
        let config = TunnelConfig::new("http://x", "vm").with_credentials("admin", "pw");

        let err = classify_handshake_error(&config, "Authentication failed");
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
        assert!(err.to_string().contains("admin"));
        assert!(!err.to_string().contains("pw\""));

        let err = classify_handshake_error(&config, "unable to authenticate");
        assert_eq!(err.kind(), ErrorKind::AuthFailed);
    }

    #[test]
    fn test_other_handshake_errors_are_generic() {
        let config = TunnelConfig::new("http://x", "vm");
        let err = classify_handshake_error(&config, "Connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::Ssh);
        assert!(err.to_string().starts_with("failed to establish SSH connection"));
    }
}
