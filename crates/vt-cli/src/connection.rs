//! Building a `TunnelConfig` from the config file, environment and flags

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;

use vt_core::config::{self, DEFAULT_SSH_PASSWORD, DEFAULT_SSH_USERNAME};
use vt_core::TunnelConfig;

/// Connection settings shared by every subcommand.
///
/// Anything given here overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Controller URL including the API path (e.g. http://localhost:6120/v1)
    #[arg(long, env = "VM_TUNNEL_URL", global = true)]
    pub url: Option<String>,

    /// Bearer token for the controller API
    #[arg(long, env = "VM_TUNNEL_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// SSH username on the VM
    #[arg(long, env = "VM_TUNNEL_SSH_USER", global = true)]
    pub user: Option<String>,

    /// SSH password on the VM
    #[arg(long, env = "VM_TUNNEL_SSH_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// SSH port on the VM
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Seconds the controller waits for the VM to become reachable
    #[arg(long, global = true)]
    pub wait: Option<u32>,

    /// SSH handshake timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
}

/// Load the base configuration.
///
/// An explicit `--config` must load; the default file is optional and a
/// broken one is only warned about.
pub fn load_base_config(explicit: Option<&Path>) -> Result<TunnelConfig> {
    if let Some(path) = explicit {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if !default_path.exists() {
        return Ok(TunnelConfig::default());
    }

    Ok(config::load_config(&default_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
        TunnelConfig::default()
    }))
}

/// Final configuration for `vm`: base config, then flags, then defaults
pub fn resolve_config(base: TunnelConfig, args: &ConnectionArgs, vm: &str) -> Result<TunnelConfig> {
    let mut config = base;
    config.vm_name = vm.to_string();

    if let Some(url) = &args.url {
        config.controller_url = url.clone();
    }
    if let Some(token) = &args.token {
        config.bearer_token = Some(token.clone());
    }
    if let Some(user) = &args.user {
        config.ssh_username = user.clone();
    }
    if let Some(password) = &args.password {
        config.ssh_password = password.clone();
    }
    if let Some(port) = args.port {
        config.ssh_port = port;
    }
    if let Some(wait) = args.wait {
        config.wait_seconds = wait;
    }
    if let Some(timeout) = args.timeout {
        config.timeout = Duration::from_secs(timeout);
    }

    if config.controller_url.is_empty() {
        bail!("controller URL is not set (use --url, VM_TUNNEL_URL or controller_url in the config file)");
    }
    if vm.is_empty() {
        bail!("VM name must not be empty");
    }
    if config.ssh_username.is_empty() {
        config.ssh_username = DEFAULT_SSH_USERNAME.to_string();
    }
    if config.ssh_password.is_empty() {
        config.ssh_password = DEFAULT_SSH_PASSWORD.to_string();
    }

    Ok(config.with_defaults())
}
