use std::time::Duration;

use anyhow::{Context, Result};
use nodeagent_core::{InstallationFilter, InstallationRecord};
use nodeagent_registry::FolderPackageRepository;

use crate::completion::write_completions_script;
use crate::config::AgentConfig;
use crate::context::Agent;
use crate::install_flow::{run_install, InstallRequest};
use crate::render::{current_output_style, print_status, render_json, OutputStyle};
use crate::report_flows::{run_packages, run_status};
use crate::service_flows::{run_init, run_restart, run_start, run_stop, run_uninstall};
use crate::services::{PidFileInspector, SpawnServiceManager};
use crate::{Cli, Commands, InstallationArgs};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        let mut stdout = std::io::stdout();
        return write_completions_script(shell, &mut stdout);
    }

    let config = AgentConfig::load(cli.config.as_deref())?;
    let sources = match &cli.command {
        Commands::Install { sources, .. } if !sources.is_empty() => sources.clone(),
        _ => config.source_repositories.clone(),
    };
    let repository = FolderPackageRepository::new(&config.local_repository, &sources);
    let services = SpawnServiceManager::new(&config.channel_directory, config.channel_timeout());
    let inspector = PidFileInspector;
    let agent = Agent::new(&config, &repository, &services, &inspector);
    let style = current_output_style();

    match cli.command {
        Commands::Install {
            id,
            version,
            instance,
            sources: _,
            prerelease,
            app_config,
        } => {
            let request = InstallRequest {
                package_id: id,
                package_version: version,
                instance,
                allow_prerelease: prerelease,
                config_file: app_config,
            };
            let installation = run_install(&agent, &request)?;
            print_status(
                style,
                "ok",
                &format!(
                    "installed {installation} into {}",
                    installation.directory.display()
                ),
            );
        }
        Commands::Uninstall { target } => {
            let removed = run_uninstall(&agent, &filter(&target))?;
            report_each(style, "uninstalled", &removed);
        }
        Commands::Init { target, timeout } => {
            let initialized = run_init(&agent, &filter(&target), seconds(timeout))?;
            report_each(style, "initialized", &initialized);
        }
        Commands::Start { target, timeout } => {
            let started = run_start(&agent, &filter(&target), seconds(timeout))?;
            report_each(style, "started", &started);
        }
        Commands::Stop { target, timeout } => {
            let stopped = run_stop(&agent, &filter(&target), seconds(timeout))?;
            report_each(style, "stopped", &stopped);
        }
        Commands::Restart { target, timeout } => {
            let restarted = run_restart(&agent, &filter(&target), seconds(timeout))?;
            report_each(style, "restarted", &restarted);
        }
        Commands::Status {
            target,
            timeout,
            format,
        } => {
            let statuses = run_status(&agent, &filter(&target), seconds(timeout))?;
            println!("{}", render_json(&statuses, format)?);
        }
        Commands::Packages {
            term,
            prerelease,
            format,
        } => {
            let ids = run_packages(&agent, &term, prerelease)
                .with_context(|| format!("failed searching packages for '{term}'"))?;
            println!("{}", render_json(&ids, format)?);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn filter(target: &InstallationArgs) -> InstallationFilter {
    InstallationFilter::new(
        target.id.as_deref(),
        target.version.as_deref(),
        target.instance.as_deref(),
    )
}

fn seconds(timeout: Option<u64>) -> Option<Duration> {
    timeout.map(Duration::from_secs)
}

fn report_each(style: OutputStyle, verb: &str, installations: &[InstallationRecord]) {
    for installation in installations {
        print_status(style, "ok", &format!("{verb} {installation}"));
    }
}
