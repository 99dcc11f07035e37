use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use nodeagent_channel::{ServiceHostClient, POLL_INTERVAL};
use nodeagent_core::{
    AgentError, AgentResult, InstallationRecord, ProcessInfo, ServiceOptions,
    WorkerProcessRecord,
};
use nodeagent_installer::remove_file_if_exists;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A worker registered as a service: what to run and with which arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ServiceDefinition {
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
    #[serde(skip)]
    pub directory: PathBuf,
}

impl ServiceDefinition {
    pub fn new(options: &ServiceOptions, executable: &Path, args: Vec<String>) -> Self {
        Self {
            name: options.app_name(),
            executable: executable.to_path_buf(),
            args,
            directory: options.directory.clone(),
        }
    }
}

/// The host's service manager, as far as the agent needs it.
pub(crate) trait ServiceManager {
    fn install_service(&self, service: &ServiceDefinition) -> AgentResult<()>;

    fn uninstall_service(&self, installation: &InstallationRecord) -> AgentResult<()>;

    /// Starts the worker and waits until its application reports started.
    fn start_service(
        &self,
        installation: &InstallationRecord,
        timeout: Option<Duration>,
    ) -> AgentResult<()>;

    fn stop_service(
        &self,
        installation: &InstallationRecord,
        timeout: Option<Duration>,
    ) -> AgentResult<()>;

    /// Runs the worker once in `init` mode and waits for it to finish.
    fn init_service(&self, service: &ServiceDefinition, timeout: Option<Duration>) -> AgentResult<()>;
}

/// Registers services as `service.toml` inside the installation and starts
/// them as detached worker processes.
#[derive(Debug, Clone)]
pub(crate) struct SpawnServiceManager {
    channel_directory: PathBuf,
    channel_timeout: Duration,
}

impl SpawnServiceManager {
    pub fn new(channel_directory: &Path, channel_timeout: Duration) -> Self {
        Self {
            channel_directory: channel_directory.to_path_buf(),
            channel_timeout,
        }
    }

    pub fn read_registration(&self, installation: &InstallationRecord) -> AgentResult<ServiceDefinition> {
        let path = installation.service_file();
        let content = fs::read_to_string(&path).with_context(|| {
            format!(
                "service {} is not registered: {}",
                installation.app_name(),
                path.display()
            )
        })?;
        let mut service: ServiceDefinition = toml::from_str(&content)
            .with_context(|| format!("failed parsing service registration: {}", path.display()))?;
        service.directory = installation.directory.clone();
        Ok(service)
    }
}

impl ServiceManager for SpawnServiceManager {
    fn install_service(&self, service: &ServiceDefinition) -> AgentResult<()> {
        let path = service.directory.join(nodeagent_core::SERVICE_FILE_NAME);
        let content = toml::to_string(service)
            .with_context(|| format!("failed serializing service {}", service.name))?;
        fs::write(&path, content)
            .with_context(|| format!("failed writing service registration: {}", path.display()))?;
        tracing::info!(service = %service.name, executable = %service.executable.display(), "registered service");
        Ok(())
    }

    fn uninstall_service(&self, installation: &InstallationRecord) -> AgentResult<()> {
        let path = installation.service_file();
        remove_file_if_exists(&path).with_context(|| {
            format!("failed removing service registration: {}", path.display())
        })?;
        tracing::info!(service = %installation.app_name(), "unregistered service");
        Ok(())
    }

    fn start_service(
        &self,
        installation: &InstallationRecord,
        timeout: Option<Duration>,
    ) -> AgentResult<()> {
        let service = self.read_registration(installation)?;
        let mut command = Command::new(&service.executable);
        command
            .args(&service.args)
            .current_dir(&service.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().with_context(|| {
            format!(
                "failed to start service {} ({})",
                service.name,
                service.executable.display()
            )
        })?;
        tracing::info!(service = %service.name, pid = child.id(), "spawned worker");

        let options = ServiceOptions::from_installation(installation);
        let client = ServiceHostClient::new(&self.channel_directory, &options, self.channel_timeout);
        let timeout = client.effective_timeout(timeout);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().context("failed waiting for worker")? {
                return Err(anyhow!(
                    "service {} exited before serving its channel ({status})",
                    service.name
                )
                .into());
            }
            if client.is_reachable() && application_started(&client) {
                tracing::info!(service = %service.name, pid = child.id(), "started service");
                return Ok(());
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AgentError::ChannelUnreachable {
                    channel: client.app_name().to_string(),
                    reason: format!("worker did not start within {timeout:?}"),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn stop_service(
        &self,
        installation: &InstallationRecord,
        timeout: Option<Duration>,
    ) -> AgentResult<()> {
        let options = ServiceOptions::from_installation(installation);
        let client = ServiceHostClient::new(&self.channel_directory, &options, self.channel_timeout);
        match client.stop(timeout) {
            Err(err) if err.is_channel_unreachable() => {
                tracing::info!(service = %installation.app_name(), "service is not running");
                Ok(())
            }
            other => other,
        }
    }

    fn init_service(&self, service: &ServiceDefinition, timeout: Option<Duration>) -> AgentResult<()> {
        let mut child = Command::new(&service.executable)
            .args(&service.args)
            .current_dir(&service.directory)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "failed to run {} for {}",
                    service.executable.display(),
                    service.name
                )
            })?;

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if let Some(status) = child.try_wait().context("failed waiting for worker")? {
                if status.success() {
                    tracing::info!(service = %service.name, "initialized");
                    return Ok(());
                }
                return Err(anyhow!("initialization of {} failed with {status}", service.name).into());
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "initialization of {} did not finish within {:?}",
                    service.name,
                    timeout.unwrap_or_default()
                )
                .into());
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

fn application_started(client: &ServiceHostClient) -> bool {
    client
        .get_status()
        .ok()
        .and_then(|status| status.get("Started").and_then(Value::as_bool))
        .unwrap_or(false)
}

/// Decides whether an installation's worker is running.
pub(crate) trait ProcessInspector {
    fn find_running(&self, installation: &InstallationRecord) -> AgentResult<Option<ProcessInfo>>;
}

/// Reads `worker.pid` and checks that the process it names is alive.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PidFileInspector;

impl ProcessInspector for PidFileInspector {
    fn find_running(&self, installation: &InstallationRecord) -> AgentResult<Option<ProcessInfo>> {
        let path = installation.pid_file();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed reading {}", path.display()))
                    .into());
            }
        };
        let record: WorkerProcessRecord = serde_json::from_str(&content)
            .with_context(|| format!("failed parsing {}", path.display()))?;

        if process_alive(record.pid) {
            Ok(Some(record.running_info()))
        } else {
            tracing::debug!(pid = record.pid, path = %path.display(), "stale worker pid file");
            Ok(None)
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks that the process exists and may be signalled.
    let result = unsafe { libc::kill(pid, 0) };
    result == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
