use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use nodeagent_core::{AgentError, AgentResult, InstallationFilter, InstallationRecord};

pub const APP_FOLDER: &str = "app";
pub const PLATFORM_FOLDER: &str = "platform";
pub const CONTENT_FOLDER: &str = "content";

/// The install root holding one directory per installation.
#[derive(Debug, Clone)]
pub struct InstallDirectory {
    root: PathBuf,
}

impl InstallDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(
        &self,
        package_id: &str,
        package_version: &str,
        instance: Option<&str>,
    ) -> InstallationRecord {
        InstallationRecord::new(&self.root, package_id, package_version, instance)
    }

    pub fn exists(&self, installation: &InstallationRecord) -> bool {
        installation.directory.exists()
    }

    pub fn app_dir(&self, installation: &InstallationRecord) -> PathBuf {
        installation.directory.join(APP_FOLDER)
    }

    pub fn platform_dir(&self, installation: &InstallationRecord) -> PathBuf {
        installation.directory.join(PLATFORM_FOLDER)
    }

    /// Creates the installation directory. Returns `false` when it was
    /// already there.
    pub fn create(&self, installation: &InstallationRecord) -> Result<bool> {
        if installation.directory.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&installation.directory).with_context(|| {
            format!(
                "failed to create installation directory {}",
                installation.directory.display()
            )
        })?;
        Ok(true)
    }

    /// Every directory under the root that parses as an installation, sorted
    /// by name. A missing root holds no installations.
    pub fn items(&self) -> Result<Vec<InstallationRecord>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read install directory {}", self.root.display())
                });
            }
        };

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match InstallationRecord::parse(&entry.path()) {
                Some(record) => items.push(record),
                None => tracing::debug!(
                    path = %entry.path().display(),
                    "ignoring directory outside the installation naming scheme"
                ),
            }
        }

        items.sort_by(|a, b| a.directory.cmp(&b.directory));
        Ok(items)
    }

    pub fn items_matching(&self, filter: &InstallationFilter) -> Result<Vec<InstallationRecord>> {
        Ok(self
            .items()?
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    /// Like [`items_matching`](Self::items_matching) but an empty result is
    /// [`AgentError::NoMatchingInstallations`].
    pub fn find(&self, filter: &InstallationFilter) -> AgentResult<Vec<InstallationRecord>> {
        let items = self.items_matching(filter)?;
        if items.is_empty() {
            return Err(AgentError::NoMatchingInstallations {
                filter: filter.to_string(),
            });
        }
        Ok(items)
    }

    /// Deletes an installation, retrying while files are still held open by
    /// a worker that is shutting down.
    pub fn delete_with_retry(
        &self,
        installation: &InstallationRecord,
        attempts: u32,
        delay: Duration,
    ) -> AgentResult<()> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match fs::remove_dir_all(&installation.directory) {
                Ok(()) => {
                    tracing::info!(installation = %installation, "deleted installation files");
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        installation = %installation,
                        attempt,
                        attempts,
                        error = %err,
                        "installation directory is busy"
                    );
                    if attempt < attempts {
                        thread::sleep(delay);
                    }
                }
            }
        }

        Err(AgentError::DirectoryBusy {
            installation: installation.app_name(),
            attempts,
        })
    }
}
