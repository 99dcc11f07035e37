use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::protocol::{
    message_id, now_unix_ms, read_json, write_json_atomic, ChannelPaths, ChannelRequest,
    ChannelResponse, ServerInfo, HEARTBEAT_INTERVAL, POLL_INTERVAL,
};

type Handler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
type Hook = Arc<dyn Fn() + Send + Sync>;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// A handler for one operation plus hooks that run after its response has
/// been written.
#[derive(Clone)]
pub struct Subscription {
    handler: Handler,
    on_success: Option<Hook>,
    on_error: Option<Hook>,
}

impl Subscription {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    drained: Condvar,
}

impl InFlight {
    fn enter(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count += 1;
        }
    }

    fn leave(&self) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(1);
            self.drained.notify_all();
        }
    }

    /// Waits until no handler runs or `grace` elapses. Returns the number of
    /// handlers still running.
    fn wait(&self, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let Ok(mut count) = self.count.lock() else {
            return 0;
        };
        while *count > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.drained.wait_timeout(count, remaining) {
                Ok((guard, _)) => count = guard,
                Err(_) => return 0,
            }
        }
        *count
    }
}

/// Serves one channel: claims request files, runs the subscribed handler for
/// each on its own thread, and writes the response.
pub struct FileChannelServer {
    name: String,
    paths: ChannelPaths,
    subscriptions: HashMap<String, Subscription>,
    running: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
    dispatcher: Option<JoinHandle<()>>,
    stop_grace: Duration,
}

impl FileChannelServer {
    pub fn new(channel_directory: &Path, app_name: &str) -> Self {
        Self {
            name: app_name.to_string(),
            paths: ChannelPaths::new(channel_directory, app_name),
            subscriptions: HashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(InFlight::default()),
            dispatcher: None,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    /// How long [`stop`](Self::stop) waits for running handlers.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    pub fn subscribe(&mut self, operation: impl Into<String>, subscription: Subscription) {
        self.subscriptions.insert(operation.into(), subscription);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        if let Some(info) = self.paths.read_server_info().ok().flatten() {
            if info.pid != std::process::id() && !info.is_stale(now_unix_ms()) {
                anyhow::bail!(
                    "channel '{}' is already served by pid {}",
                    self.name,
                    info.pid
                );
            }
        }

        self.paths.ensure_dirs()?;
        clear_dir(&self.paths.processing_dir())?;
        write_json_atomic(&self.paths.server_file(), &ServerInfo::current())?;
        self.running.store(true, Ordering::SeqCst);

        let dispatcher = Dispatcher {
            name: self.name.clone(),
            paths: self.paths.clone(),
            subscriptions: Arc::new(self.subscriptions.clone()),
            running: Arc::clone(&self.running),
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = thread::Builder::new()
            .name(format!("channel-{}", self.name))
            .spawn(move || dispatcher.run())
            .context("failed to spawn channel dispatcher")?;
        self.dispatcher = Some(handle);

        tracing::info!(channel = %self.name, path = %self.paths.root().display(), "channel server started");
        Ok(())
    }

    /// Stops claiming requests, waits for running handlers up to the stop
    /// grace, and withdraws the server advertisement.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!(channel = %self.name, "channel dispatcher panicked");
            }
        }
        if !was_running {
            return;
        }

        let remaining = self.in_flight.wait(self.stop_grace);
        if remaining > 0 {
            tracing::warn!(channel = %self.name, remaining, "stopping with handlers still running");
        }
        if let Err(err) = fs::remove_file(self.paths.server_file()) {
            tracing::debug!(channel = %self.name, error = %err, "failed removing server file");
        }
        tracing::info!(channel = %self.name, "channel server stopped");
    }
}

impl Drop for FileChannelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Dispatcher {
    name: String,
    paths: ChannelPaths,
    subscriptions: Arc<HashMap<String, Subscription>>,
    running: Arc<AtomicBool>,
    in_flight: Arc<InFlight>,
}

impl Dispatcher {
    fn run(self) {
        let mut last_heartbeat = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                if let Err(err) = write_json_atomic(&self.paths.server_file(), &ServerInfo::current())
                {
                    tracing::warn!(channel = %self.name, error = %format!("{err:#}"), "heartbeat failed");
                }
                last_heartbeat = Instant::now();
            }

            match self.pending_requests() {
                Ok(ids) => {
                    for id in ids {
                        if let Err(err) = self.claim_and_dispatch(&id) {
                            tracing::warn!(
                                channel = %self.name,
                                request = %id,
                                error = %format!("{err:#}"),
                                "failed dispatching request"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(channel = %self.name, error = %format!("{err:#}"), "failed scanning requests");
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn pending_requests(&self) -> Result<Vec<String>> {
        let dir = self.paths.requests_dir();
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed reading {}", dir.display()))?
        {
            let entry = entry?;
            if let Some(id) = message_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn claim_and_dispatch(&self, id: &str) -> Result<()> {
        let processing_path = self.paths.processing_path(id);
        if fs::rename(self.paths.request_path(id), &processing_path).is_err() {
            // Withdrawn by the client or claimed already.
            return Ok(());
        }

        let request = match read_json::<ChannelRequest>(&processing_path) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(err) => {
                let response = ChannelResponse::failure(id, format!("malformed request: {err:#}"));
                write_json_atomic(&self.paths.response_path(id), &response)?;
                let _ = fs::remove_file(&processing_path);
                return Ok(());
            }
        };

        let Some(subscription) = self.subscriptions.get(&request.operation).cloned() else {
            let response = ChannelResponse::failure(
                &request.id,
                format!("unknown operation '{}'", request.operation),
            );
            write_json_atomic(&self.paths.response_path(id), &response)?;
            let _ = fs::remove_file(&processing_path);
            return Ok(());
        };

        let response_path = self.paths.response_path(id);
        let in_flight = Arc::clone(&self.in_flight);
        let name = self.name.clone();
        in_flight.enter();
        let spawned = thread::Builder::new()
            .name(format!("channel-{}-{}", self.name, request.operation))
            .spawn({
                let in_flight = Arc::clone(&in_flight);
                move || {
                    handle_request(&name, request, subscription, &response_path, &processing_path);
                    in_flight.leave();
                }
            });
        if let Err(err) = spawned {
            in_flight.leave();
            return Err(err).context("failed to spawn request handler");
        }
        Ok(())
    }
}

fn handle_request(
    channel: &str,
    request: ChannelRequest,
    subscription: Subscription,
    response_path: &Path,
    processing_path: &Path,
) {
    tracing::debug!(channel, operation = %request.operation, request = %request.id, "handling request");

    let handler = Arc::clone(&subscription.handler);
    let args = request.args;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| (*handler)(args)))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("handler panicked")));

    let (response, hook) = match outcome {
        Ok(result) => (
            ChannelResponse::success(&request.id, result),
            subscription.on_success,
        ),
        Err(err) => {
            tracing::error!(
                channel,
                operation = %request.operation,
                error = %format!("{err:#}"),
                "operation failed"
            );
            (
                ChannelResponse::failure(&request.id, format!("{err:#}")),
                subscription.on_error,
            )
        }
    };

    if let Err(err) = write_json_atomic(response_path, &response) {
        tracing::error!(channel, error = %format!("{err:#}"), "failed writing response");
    }
    let _ = fs::remove_file(processing_path);

    if let Some(hook) = hook {
        (*hook)();
    }
}

fn clear_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing stale {}", path.display()))?;
        }
    }
    Ok(())
}
