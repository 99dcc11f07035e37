use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod context;
mod dispatch;
mod install_flow;
mod render;
mod report_flows;
mod service_flows;
mod services;

use dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "nodeagent")]
#[command(about = "Installs and controls packaged applications on this node", long_about = None)]
#[command(version)]
struct Cli {
    /// Agent configuration file (defaults to NODEAGENT_CONFIG, then
    /// nodeagent.toml next to the executable).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

/// Selects installations by id, version and instance. Omitted values match
/// everything.
#[derive(Args, Debug, Clone, Default)]
struct InstallationArgs {
    #[arg(short = 'i', long = "id")]
    id: Option<String>,
    #[arg(short = 'v', long)]
    version: Option<String>,
    #[arg(short = 'n', long)]
    instance: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install an application with its platform and service host.
    Install {
        #[arg(short = 'i', long = "id")]
        id: String,
        #[arg(short = 'v', long)]
        version: Option<String>,
        #[arg(short = 'n', long)]
        instance: Option<String>,
        /// Package sources used instead of the configured ones.
        #[arg(short = 's', long = "source")]
        sources: Vec<PathBuf>,
        #[arg(short = 'p', long)]
        prerelease: bool,
        /// Application config file copied into the installation.
        #[arg(short = 'c', long = "app-config")]
        app_config: Option<PathBuf>,
    },
    /// Stop, unregister and delete installations.
    Uninstall {
        #[command(flatten)]
        target: InstallationArgs,
    },
    /// Run the one-time application initialization.
    Init {
        #[command(flatten)]
        target: InstallationArgs,
        /// Timeout in seconds.
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },
    Start {
        #[command(flatten)]
        target: InstallationArgs,
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },
    Stop {
        #[command(flatten)]
        target: InstallationArgs,
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },
    Restart {
        #[command(flatten)]
        target: InstallationArgs,
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },
    /// Print the status of installations as JSON.
    Status {
        #[command(flatten)]
        target: InstallationArgs,
        #[arg(short = 't', long)]
        timeout: Option<u64>,
        /// Indent the JSON output.
        #[arg(short = 'f', long)]
        format: bool,
    },
    /// Search the package feeds.
    Packages {
        #[arg(short = 'i', long = "id")]
        term: String,
        #[arg(short = 'p', long)]
        prerelease: bool,
        #[arg(short = 'f', long)]
        format: bool,
    },
    /// Print a shell completion script.
    Completions { shell: Shell },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("unhandled panic: {info}");
    }));

    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
