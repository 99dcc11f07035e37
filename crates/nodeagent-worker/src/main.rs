use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nodeagent_core::ServiceOptions;
use tracing_subscriber::EnvFilter;

mod pid_file;
mod process_host;
mod supervisor;

use supervisor::{default_channel_directory, host_registry, init_worker, run_worker};

#[derive(Parser, Debug)]
#[command(name = "nodeagent-worker")]
#[command(about = "Hosts one installed application and serves its control channel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the application until it is stopped.
    Run(WorkerArgs),
    /// Run the application's one-time initialization.
    Init(WorkerArgs),
}

#[derive(Args, Debug, Clone)]
struct WorkerArgs {
    #[arg(long)]
    package_id: String,
    #[arg(long)]
    package_version: String,
    #[arg(long)]
    package_instance: Option<String>,
    #[arg(long)]
    package_directory: PathBuf,
    #[arg(long)]
    package_config: Option<PathBuf>,
    /// Timeout in seconds for starting, stopping and initializing.
    #[arg(long)]
    package_timeout: Option<u64>,
    #[arg(long)]
    channel_directory: Option<PathBuf>,
}

impl WorkerArgs {
    fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            package_id: self.package_id.trim().to_string(),
            package_version: self.package_version.trim().to_string(),
            instance: self
                .package_instance
                .as_deref()
                .unwrap_or_default()
                .trim()
                .to_string(),
            directory: self.package_directory.clone(),
            config_path: self.package_config.clone(),
            timeout: self.package_timeout.map(Duration::from_secs),
        }
    }

    fn channel_directory(&self) -> PathBuf {
        self.channel_directory
            .clone()
            .unwrap_or_else(|| default_channel_directory(&self.package_directory))
    }
}

fn run(cli: Cli) -> Result<()> {
    let registry = host_registry();
    match cli.mode {
        Mode::Run(args) => run_worker(&registry, &args.service_options(), &args.channel_directory()),
        Mode::Init(args) => init_worker(&registry, &args.service_options()),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("unhandled panic in worker: {info}");
    }));

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests;
