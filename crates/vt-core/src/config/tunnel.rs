//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// SSH port used when none is configured
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Seconds the controller waits for the VM to become reachable
pub const DEFAULT_WAIT_SECONDS: u32 = 30;

/// Budget for establishing the SSH session
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Username of the stock VM images
pub const DEFAULT_SSH_USERNAME: &str = "admin";

/// Password of the stock VM images
pub const DEFAULT_SSH_PASSWORD: &str = "admin";

/// Configuration for one session-establishment attempt.
///
/// Zero values for `ssh_port`, `wait_seconds` and `timeout` mean "unset";
/// [`TunnelConfig::apply_defaults`] fills them in before use.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Controller URL including the API version path (e.g. `http://localhost:6120/v1`)
    pub controller_url: String,

    /// Bearer token for the controller API
    pub bearer_token: Option<String>,

    /// Name of the target VM, used verbatim as a path segment
    pub vm_name: String,

    /// SSH port on the VM
    pub ssh_port: u16,

    /// How long the controller should wait for the VM before failing the dial
    pub wait_seconds: u32,

    /// SSH username
    pub ssh_username: String,

    /// SSH password
    pub ssh_password: String,

    /// Handshake timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl TunnelConfig {
    /// Create a config for `vm_name` behind the controller at `controller_url`
    pub fn new(controller_url: impl Into<String>, vm_name: impl Into<String>) -> Self {
        Self {
            controller_url: controller_url.into(),
            vm_name: vm_name.into(),
            ..Default::default()
        }
    }

    /// Set the controller bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Set the SSH credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.ssh_username = username.into();
        self.ssh_password = password.into();
        self
    }

    /// Fill unset port, wait budget and timeout. Explicit values are kept.
    pub fn apply_defaults(&mut self) {
        if self.ssh_port == 0 {
            self.ssh_port = DEFAULT_SSH_PORT;
        }
        if self.wait_seconds == 0 {
            self.wait_seconds = DEFAULT_WAIT_SECONDS;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }

    /// Consuming variant of [`TunnelConfig::apply_defaults`]
    pub fn with_defaults(mut self) -> Self {
        self.apply_defaults();
        self
    }

    /// The bearer token, treating an empty string as absent
    pub fn token(&self) -> Option<&str> {
        self.bearer_token.as_deref().filter(|t| !t.is_empty())
    }
}

// Credentials never reach logs
impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("controller_url", &self.controller_url)
            .field("bearer_token", &self.token().map(|_| "<redacted>"))
            .field("vm_name", &self.vm_name)
            .field("ssh_port", &self.ssh_port)
            .field("wait_seconds", &self.wait_seconds)
            .field("ssh_username", &self.ssh_username)
            .field("ssh_password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
