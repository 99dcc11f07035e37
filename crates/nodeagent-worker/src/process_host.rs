use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use nodeagent_channel::{AppHost, HostContext};
use serde_json::{json, Value};

/// Registry name of [`ProcessAppHost`].
pub(crate) const PROCESS_HOST: &str = "process";

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Runs the package's worker command as a child process.
///
/// Stopping asks the child to terminate and kills it once the stop timeout
/// has passed.
#[derive(Debug)]
pub(crate) struct ProcessAppHost {
    program: PathBuf,
    args: Vec<String>,
    init_args: Vec<String>,
    working_directory: PathBuf,
    environment: Vec<(String, String)>,
    child: Mutex<Option<Child>>,
}

impl ProcessAppHost {
    pub fn from_context(context: &HostContext) -> Result<Self> {
        let command = context
            .worker
            .command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .ok_or_else(|| anyhow!("{} declares no worker command", context.options.app_name()))?;

        let directory = &context.options.directory;
        let program = resolve_program(directory, command);

        let mut environment = vec![
            ("NODEAGENT_PACKAGE_ID".to_string(), context.options.package_id.clone()),
            (
                "NODEAGENT_PACKAGE_VERSION".to_string(),
                context.options.package_version.clone(),
            ),
            (
                "NODEAGENT_PACKAGE_DIRECTORY".to_string(),
                directory.display().to_string(),
            ),
            (
                "NODEAGENT_APP_DIRECTORY".to_string(),
                context.app_directory.display().to_string(),
            ),
        ];
        if !context.options.instance.is_empty() {
            environment.push((
                "NODEAGENT_PACKAGE_INSTANCE".to_string(),
                context.options.instance.clone(),
            ));
        }
        if let Some(config_path) = &context.options.config_path {
            environment.push((
                "NODEAGENT_PACKAGE_CONFIG".to_string(),
                config_path.display().to_string(),
            ));
        }

        Ok(Self {
            program,
            args: context.worker.args.clone(),
            init_args: context.worker.init_args.clone(),
            working_directory: directory.clone(),
            environment,
            child: Mutex::new(None),
        })
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .current_dir(&self.working_directory)
            .envs(self.environment.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null());
        command
    }

    fn lock_child(&self) -> Result<std::sync::MutexGuard<'_, Option<Child>>> {
        self.child
            .lock()
            .map_err(|_| anyhow!("application process lock poisoned"))
    }
}

impl AppHost for ProcessAppHost {
    fn start(&self, _timeout: Option<Duration>) -> Result<()> {
        let mut slot = self.lock_child()?;
        if let Some(child) = slot.as_mut() {
            if child.try_wait()?.is_none() {
                return Ok(());
            }
        }

        let child = self.command(&self.args).spawn().with_context(|| {
            format!("failed to start application {}", self.program.display())
        })?;
        tracing::info!(program = %self.program.display(), pid = child.id(), "started application process");
        *slot = Some(child);
        Ok(())
    }

    fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let Some(mut child) = self.lock_child()?.take() else {
            return Ok(());
        };
        if let Some(status) = child.try_wait()? {
            tracing::info!(pid = child.id(), %status, "application process had already exited");
            return Ok(());
        }

        request_termination(&child);
        let timeout = timeout.unwrap_or(DEFAULT_STOP_TIMEOUT);
        match wait_until(&mut child, Some(Instant::now() + timeout))? {
            Some(status) => {
                tracing::info!(pid = child.id(), %status, "application process stopped");
            }
            None => {
                tracing::warn!(pid = child.id(), ?timeout, "application process did not stop in time, killing it");
                child.kill().context("failed killing application process")?;
                child.wait().context("failed reaping application process")?;
            }
        }
        Ok(())
    }

    fn status(&self) -> Result<Value> {
        let mut slot = self.lock_child()?;
        let Some(child) = slot.as_mut() else {
            return Ok(json!({ "Running": false }));
        };
        let pid = child.id();
        Ok(match child.try_wait()? {
            None => json!({ "Pid": pid, "Running": true }),
            Some(status) => json!({ "Pid": pid, "Running": false, "ExitCode": status.code() }),
        })
    }

    fn init(&self, timeout: Option<Duration>) -> Result<()> {
        if self.init_args.is_empty() {
            tracing::info!(program = %self.program.display(), "application declares no initialization");
            return Ok(());
        }

        let mut child = self.command(&self.init_args).spawn().with_context(|| {
            format!("failed to initialize application {}", self.program.display())
        })?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        match wait_until(&mut child, deadline)? {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(anyhow!("application initialization failed with {status}")),
            None => {
                child.kill().context("failed killing application initialization")?;
                child.wait().context("failed reaping application initialization")?;
                Err(anyhow!(
                    "application initialization did not finish within {:?}",
                    timeout.unwrap_or_default()
                ))
            }
        }
    }
}

fn resolve_program(directory: &Path, command: &str) -> PathBuf {
    let path = Path::new(command);
    // Bare names not shipped in the installation are looked up on PATH.
    if path.is_absolute() || (path.components().count() == 1 && !directory.join(path).exists()) {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

/// `None` once `deadline` passes with the child still running.
fn wait_until(child: &mut Child, deadline: Option<Instant>) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait().context("failed waiting for application process")? {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(None);
        }
        thread::sleep(WAIT_INTERVAL);
    }
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(pid, error = %std::io::Error::last_os_error(), "failed signalling application process");
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}
