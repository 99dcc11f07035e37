use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use nodeagent_core::WorkerProcessRecord;

/// Holds `worker.pid` for as long as the worker runs.
#[derive(Debug)]
pub(crate) struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn create(path: &Path, product_name: &str) -> Result<Self> {
        let record = current_process_record(product_name);
        let content =
            serde_json::to_string_pretty(&record).context("failed serializing worker pid record")?;
        fs::write(path, content)
            .with_context(|| format!("failed writing worker pid file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), pid = record.pid, "wrote worker pid file");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed removing worker pid file");
            }
        }
    }
}

pub(crate) fn current_process_record(product_name: &str) -> WorkerProcessRecord {
    let module_name = env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().map(|name| name.to_string_lossy().to_string()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    let started_at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();

    WorkerProcessRecord {
        pid: std::process::id(),
        started_at_unix,
        module_name,
        file_version: env!("CARGO_PKG_VERSION").to_string(),
        product_name: Some(product_name.to_string()),
    }
}
