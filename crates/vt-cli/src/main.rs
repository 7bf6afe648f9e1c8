//! vm-tunnel CLI
//!
//! Runs commands, scripts and uploads on VMs that are only reachable
//! through the controller's port-forward endpoint.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vm_tunnel::commands::{self, UNREACHABLE_EXIT_CODE};
use vm_tunnel::connection::{load_base_config, resolve_config, ConnectionArgs};
use vm_tunnel::output::print_error;
use vt_core::FileUploadOptions;

#[derive(Parser)]
#[command(name = "vm-tunnel")]
#[command(author, version, about = "Run commands on VMs through the controller's port-forward tunnel")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether SSH on a VM is ready (exit 0 when it is)
    Probe {
        /// VM name
        vm: String,
    },

    /// Run a command on a VM and exit with its exit code
    Exec {
        /// VM name
        vm: String,
        /// Print the result as JSON instead of relaying output
        #[arg(long)]
        json: bool,
        /// Command line to run, passed verbatim to the remote shell
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Run a local script on a VM under bash
    RunScript {
        /// VM name
        vm: String,
        /// Script file to run
        script: PathBuf,
        /// Environment variable exported before the script runs
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = commands::parse_env_pair)]
        env: Vec<(String, String)>,
        /// Upload the script and execute the file instead of piping it
        #[arg(long)]
        upload: bool,
    },

    /// Upload a local file to a VM over SFTP
    Upload {
        /// VM name
        vm: String,
        /// Local file
        local: PathBuf,
        /// Absolute destination path on the VM
        remote: String,
        /// Permission bits in octal (e.g. 755)
        #[arg(short, long, value_parser = commands::parse_mode)]
        mode: Option<u32>,
        /// Create missing parent directories
        #[arg(short, long)]
        parents: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling...");
            cancel_on_signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            ExitCode::from(UNREACHABLE_EXIT_CODE)
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<ExitCode> {
    let base = load_base_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Probe { vm } => {
            let config = resolve_config(base, &cli.connection, &vm)?;
            Ok(commands::probe_command(config, cancel).await)
        }

        Commands::Exec { vm, json, command } => {
            let config = resolve_config(base, &cli.connection, &vm)?;
            commands::exec_command(config, &command, json, cancel).await
        }

        Commands::RunScript {
            vm,
            script,
            env,
            upload,
        } => {
            let config = resolve_config(base, &cli.connection, &vm)?;
            commands::run_script_command(config, &script, env, upload, cancel).await
        }

        Commands::Upload {
            vm,
            local,
            remote,
            mode,
            parents,
        } => {
            let config = resolve_config(base, &cli.connection, &vm)?;
            let mut options = FileUploadOptions::new(remote).mode(mode.unwrap_or(0));
            if parents {
                options = options.parents();
            }
            commands::upload_command(config, &local, options, cancel).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
