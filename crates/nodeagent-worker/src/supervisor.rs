use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use nodeagent_channel::{AppHost, GuardedAppHost, HostContext, HostRegistry, ServiceHostServer};
use nodeagent_core::{PackageManifest, ServiceOptions, MANIFEST_FILE_NAME};

use crate::pid_file::PidFileGuard;
use crate::process_host::{ProcessAppHost, PROCESS_HOST};

const APP_FOLDER: &str = "app";

/// Why the worker leaves its run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shutdown {
    /// `Stop` arrived over the control channel.
    Requested,
    /// The process was interrupted or asked to terminate.
    Signal,
}

pub(crate) fn host_registry() -> HostRegistry {
    let mut registry = HostRegistry::new();
    registry.register(PROCESS_HOST, |context| {
        Ok(Box::new(ProcessAppHost::from_context(context)?) as Box<dyn AppHost>)
    });
    registry
}

/// Reads the worker section of the installed application manifest.
pub(crate) fn load_host_context(options: &ServiceOptions) -> Result<HostContext> {
    let app_directory = options.directory.join(APP_FOLDER);
    let manifest_path = app_directory.join(MANIFEST_FILE_NAME);
    let content = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed reading {}", manifest_path.display()))?;
    let manifest = PackageManifest::from_toml_str(&content)
        .with_context(|| format!("invalid application manifest {}", manifest_path.display()))?;
    let worker = manifest
        .worker
        .ok_or_else(|| anyhow!("{} has no [worker] section", manifest_path.display()))?;

    Ok(HostContext {
        options: options.clone(),
        worker,
        app_directory,
    })
}

pub(crate) fn create_host(registry: &HostRegistry, options: &ServiceOptions) -> Result<Box<dyn AppHost>> {
    let context = load_host_context(options)?;
    tracing::debug!(host = %context.worker.host, "creating application host");
    registry.create(&context.worker.host, &context)
}

/// The channel directory used when none is given: `channels` next to the
/// install root.
pub(crate) fn default_channel_directory(package_directory: &Path) -> PathBuf {
    package_directory
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."))
        .join("channels")
}

/// `init` mode: runs the application's one-time initialization and exits.
pub(crate) fn init_worker(registry: &HostRegistry, options: &ServiceOptions) -> Result<()> {
    let host = create_host(registry, options)?;
    host.init(options.timeout)
        .with_context(|| format!("failed initializing {}", options.app_name()))?;
    tracing::info!(app = %options.app_name(), "application initialized");
    Ok(())
}

/// `run` mode: starts the application, serves the control channel and stops
/// the application again once a shutdown arrives.
pub(crate) fn run_worker(
    registry: &HostRegistry,
    options: &ServiceOptions,
    channel_directory: &Path,
) -> Result<()> {
    let host = Arc::new(GuardedAppHost::new(create_host(registry, options)?));

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let signal_tx = shutdown_tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Shutdown::Signal);
    })
    .context("failed to set signal handler")?;

    serve_until_shutdown(host, options, channel_directory, shutdown_tx, shutdown_rx)
}

/// Claims the channel, then records the pid and starts the application. A
/// worker that loses the claim leaves the running worker's pid file alone.
pub(crate) fn serve_until_shutdown(
    host: Arc<GuardedAppHost>,
    options: &ServiceOptions,
    channel_directory: &Path,
    shutdown_tx: Sender<Shutdown>,
    shutdown_rx: Receiver<Shutdown>,
) -> Result<()> {
    let app_name = options.app_name();
    let mut server = ServiceHostServer::new(channel_directory, &app_name, Arc::clone(&host), move || {
        let _ = shutdown_tx.send(Shutdown::Requested);
    });
    server
        .start()
        .with_context(|| format!("failed opening control channel for {app_name}"))?;

    let pid_file = match PidFileGuard::create(
        &options.directory.join(nodeagent_core::WORKER_PID_FILE_NAME),
        &options.package_id,
    ) {
        Ok(pid_file) => pid_file,
        Err(err) => {
            server.stop();
            return Err(err);
        }
    };

    if let Err(err) = host.start(options.timeout) {
        server.stop();
        drop(pid_file);
        return Err(err.context(format!("failed starting {app_name}")));
    }
    tracing::info!(app = %app_name, channel = %server.paths().root().display(), "worker running");

    let reason = shutdown_rx.recv().unwrap_or(Shutdown::Signal);
    tracing::info!(app = %app_name, ?reason, "worker shutting down");

    stop_host(&host, options, &app_name);
    server.stop();
    drop(pid_file);
    Ok(())
}

fn stop_host(host: &GuardedAppHost, options: &ServiceOptions, app_name: &str) {
    if let Err(err) = host.stop(options.timeout) {
        tracing::warn!(app = %app_name, error = %format!("{err:#}"), "failed stopping application");
    }
}
