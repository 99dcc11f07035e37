use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use nodeagent_core::{ServiceOptions, WorkerSpec};
use serde_json::Value;

/// An application hosted inside a worker process.
pub trait AppHost: Send + Sync {
    fn start(&self, timeout: Option<Duration>) -> Result<()>;

    fn stop(&self, timeout: Option<Duration>) -> Result<()>;

    /// Application-defined status, reported as-is by `GetStatus`.
    fn status(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    /// One-time initialization run by the worker's `init` mode.
    fn init(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// Makes `start` and `stop` idempotent: concurrent or repeated calls reach
/// the hosted application at most once per state change.
pub struct GuardedAppHost {
    inner: Box<dyn AppHost>,
    started: AtomicBool,
    transition: Mutex<()>,
}

impl GuardedAppHost {
    pub fn new(inner: Box<dyn AppHost>) -> Self {
        Self {
            inner,
            started: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        let _guard = self
            .transition
            .lock()
            .map_err(|_| anyhow!("application host lock poisoned"))?;
        if self.is_started() {
            return Ok(());
        }
        self.inner.start(timeout)?;
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }
        let _guard = self
            .transition
            .lock()
            .map_err(|_| anyhow!("application host lock poisoned"))?;
        if !self.is_started() {
            return Ok(());
        }
        self.inner.stop(timeout)?;
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn status(&self) -> Result<Value> {
        self.inner.status()
    }

    pub fn init(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.init(timeout)
    }
}

/// What a host factory gets to build the hosted application from.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub options: ServiceOptions,
    pub worker: WorkerSpec,
    pub app_directory: PathBuf,
}

pub type AppHostFactory = Box<dyn Fn(&HostContext) -> Result<Box<dyn AppHost>> + Send + Sync>;

/// Host implementations by name. Lookup ignores case.
#[derive(Default)]
pub struct HostRegistry {
    factories: BTreeMap<String, AppHostFactory>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&HostContext) -> Result<Box<dyn AppHost>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_lowercase(), Box::new(factory));
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, context: &HostContext) -> Result<Box<dyn AppHost>> {
        let factory = self
            .factories
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| {
                anyhow!(
                    "unknown application host '{}' (known: {})",
                    name,
                    self.names().join(", ")
                )
            })?;
        factory(context)
    }
}
