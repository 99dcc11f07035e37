use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use nodeagent_channel::{ChannelPaths, ServiceHostClient, POLL_INTERVAL, STOP};
use nodeagent_core::{
    AgentError, AgentResult, InstallationFilter, InstallationRecord, ServiceOptions,
};
use nodeagent_installer::{TransactionError, TransactionManager};

use crate::context::Agent;
use crate::services::ServiceDefinition;

/// Installations selected by the first stage of every control command.
#[derive(Debug, Default)]
pub(crate) struct ControlContext {
    pub installations: Vec<InstallationRecord>,
}

fn find_stage<'a>(
    agent: &'a Agent<'a>,
    filter: &'a InstallationFilter,
) -> impl FnMut(&mut ControlContext) -> AgentResult<()> + 'a {
    move |ctx| {
        ctx.installations = agent.layout.find(filter)?;
        tracing::info!(
            count = ctx.installations.len(),
            filter = %filter,
            "found installations"
        );
        Ok(())
    }
}

fn options(installation: &InstallationRecord, timeout: Option<Duration>) -> ServiceOptions {
    ServiceOptions::from_installation(installation).with_timeout(timeout)
}

/// Starts through the running worker when it answers, otherwise through the
/// service manager. A live worker that does not serve its channel is left
/// alone rather than started twice.
pub(crate) fn start_installation(
    agent: &Agent<'_>,
    installation: &InstallationRecord,
    timeout: Option<Duration>,
) -> AgentResult<()> {
    let client = agent.host_client(&options(installation, timeout));
    if client.is_reachable() {
        client.start(timeout)?;
        tracing::info!(installation = %installation, "started application");
        return Ok(());
    }
    if let Some(process) = agent.inspector.find_running(installation)? {
        return Err(AgentError::ChannelUnreachable {
            channel: client.app_name().to_string(),
            reason: format!(
                "worker pid {} is running but does not serve its channel",
                process.id.unwrap_or_default()
            ),
        });
    }
    agent.services.start_service(installation, timeout)?;
    tracing::info!(installation = %installation, "started service");
    Ok(())
}

/// Stops the worker over the channel and waits for it to withdraw. A worker
/// that does not answer is already stopped.
pub(crate) fn stop_installation(
    agent: &Agent<'_>,
    installation: &InstallationRecord,
    timeout: Option<Duration>,
) -> AgentResult<()> {
    let client = agent.host_client(&options(installation, timeout));
    match client.stop(timeout) {
        Ok(()) => {
            wait_for_exit(agent, installation, &client, timeout)?;
            tracing::info!(installation = %installation, "stopped application");
            Ok(())
        }
        Err(err) if err.is_channel_unreachable() => {
            tracing::info!(installation = %installation, "application is already stopped");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// The worker answers `Stop` before it releases its channel and pid file.
fn wait_for_exit(
    agent: &Agent<'_>,
    installation: &InstallationRecord,
    client: &ServiceHostClient,
    timeout: Option<Duration>,
) -> AgentResult<()> {
    let timeout = client.effective_timeout(timeout);
    let deadline = Instant::now() + timeout;
    loop {
        if !client.is_reachable() && agent.inspector.find_running(installation)?.is_none() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(AgentError::ChannelTimeout {
                channel: client.app_name().to_string(),
                operation: STOP.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

pub(crate) fn run_start(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
    timeout: Option<Duration>,
) -> Result<Vec<InstallationRecord>, TransactionError> {
    let mut context = ControlContext::default();
    TransactionManager::new("Start")
        .stage("FindAppInstallations", find_stage(agent, filter))
        .stage("StartAppServices", |ctx: &mut ControlContext| {
            ctx.installations
                .iter()
                .try_for_each(|installation| start_installation(agent, installation, timeout))
        })
        .execute(&mut context)?;
    Ok(context.installations)
}

pub(crate) fn run_stop(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
    timeout: Option<Duration>,
) -> Result<Vec<InstallationRecord>, TransactionError> {
    let mut context = ControlContext::default();
    TransactionManager::new("Stop")
        .stage("FindAppInstallations", find_stage(agent, filter))
        .stage("StopAppServices", |ctx: &mut ControlContext| {
            ctx.installations
                .iter()
                .try_for_each(|installation| stop_installation(agent, installation, timeout))
        })
        .execute(&mut context)?;
    Ok(context.installations)
}

pub(crate) fn run_restart(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
    timeout: Option<Duration>,
) -> Result<Vec<InstallationRecord>, TransactionError> {
    let mut context = ControlContext::default();
    TransactionManager::new("Restart")
        .stage("FindAppInstallations", find_stage(agent, filter))
        .stage("StopAppServices", |ctx: &mut ControlContext| {
            ctx.installations
                .iter()
                .try_for_each(|installation| stop_installation(agent, installation, timeout))
        })
        .stage("StartAppServices", |ctx: &mut ControlContext| {
            ctx.installations
                .iter()
                .try_for_each(|installation| start_installation(agent, installation, timeout))
        })
        .execute(&mut context)?;
    Ok(context.installations)
}

pub(crate) fn run_init(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
    timeout: Option<Duration>,
) -> Result<Vec<InstallationRecord>, TransactionError> {
    let mut context = ControlContext::default();
    TransactionManager::new("Init")
        .stage("FindAppInstallations", find_stage(agent, filter))
        .stage("InitAppServices", |ctx: &mut ControlContext| {
            ctx.installations.iter().try_for_each(|installation| {
                let options = options(installation, timeout)
                    .with_config_path(registered_config_path(installation));
                let service = agent.service_definition(&options, "init");
                agent.services.init_service(&service, timeout)
            })
        })
        .execute(&mut context)?;
    Ok(context.installations)
}

pub(crate) fn run_uninstall(
    agent: &Agent<'_>,
    filter: &InstallationFilter,
) -> Result<Vec<InstallationRecord>, TransactionError> {
    let (attempts, delay) = agent.delete_attempts();
    let mut context = ControlContext::default();
    TransactionManager::new("Uninstall")
        .stage("FindAppInstallations", find_stage(agent, filter))
        .stage("UninstallAppServices", |ctx: &mut ControlContext| {
            ctx.installations.iter().try_for_each(|installation| {
                if let Err(err) = agent.services.stop_service(installation, None) {
                    tracing::warn!(
                        installation = %installation,
                        error = %err,
                        "failed stopping application before uninstall"
                    );
                }
                agent.services.uninstall_service(installation)
            })
        })
        .stage("DeleteAppFiles", |ctx: &mut ControlContext| {
            ctx.installations.iter().try_for_each(|installation| {
                agent
                    .layout
                    .delete_with_retry(installation, attempts, delay)?;
                remove_channel_directory(agent, installation);
                Ok(())
            })
        })
        .execute(&mut context)?;
    Ok(context.installations)
}

/// The worker is gone by now, so a leftover channel directory only costs
/// disk space. Failing to remove it is logged and ignored.
fn remove_channel_directory(agent: &Agent<'_>, installation: &InstallationRecord) {
    let paths = ChannelPaths::new(&agent.config.channel_directory, &installation.app_name());
    match fs::remove_dir_all(paths.root()) {
        Ok(()) => {
            tracing::info!(channel = %paths.root().display(), "removed channel directory");
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(
                channel = %paths.root().display(),
                error = %err,
                "failed removing channel directory"
            );
        }
    }
}

/// The app config copied at install time, found through the registered
/// worker arguments.
fn registered_config_path(installation: &InstallationRecord) -> Option<PathBuf> {
    let content = fs::read_to_string(installation.service_file()).ok()?;
    let service: ServiceDefinition = toml::from_str(&content).ok()?;
    service
        .args
        .iter()
        .position(|arg| arg == "--package-config")
        .and_then(|index| service.args.get(index + 1))
        .map(PathBuf::from)
}
