//! russh client handler

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;

/// SSH client handler for tunneled sessions.
///
/// The tunnel reaches the VM by name through an authenticated controller,
/// not by network address, so any host key is accepted. The fingerprint is
/// still logged for diagnostics.
pub(crate) struct ClientHandler {
    vm: String,
}

impl ClientHandler {
    pub(crate) fn new(vm: impl Into<String>) -> Self {
        Self { vm: vm.into() }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            vm = %self.vm,
            "Server host key: {}",
            server_public_key.fingerprint()
        );
        Ok(true)
    }
}
