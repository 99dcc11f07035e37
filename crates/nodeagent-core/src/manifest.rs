use std::collections::BTreeMap;

use anyhow::{anyhow, Context};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::identity::{is_valid_package_id, PackageIdentity};

pub const MANIFEST_FILE_NAME: &str = "package.toml";
pub const DEFAULT_WORKER_HOST: &str = "process";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageManifest {
    pub id: String,
    pub version: Version,
    pub description: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionReq>,
    pub worker: Option<WorkerSpec>,
}

/// How the worker process hosts the application shipped in a package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerSpec {
    #[serde(default = "default_worker_host")]
    pub host: String,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Arguments for the one-time `init` run. Empty means the application
    /// needs no initialization.
    #[serde(default)]
    pub init_args: Vec<String>,
}

fn default_worker_host() -> String {
    DEFAULT_WORKER_HOST.to_string()
}

impl PackageManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self = toml::from_str(input).context("failed to parse package manifest")?;
        if !is_valid_package_id(&manifest.id) {
            return Err(anyhow!("invalid package id '{}'", manifest.id));
        }
        if !manifest.version.build.is_empty() {
            return Err(anyhow!(
                "package '{}' version {} carries build metadata",
                manifest.id,
                manifest.version
            ));
        }
        if manifest
            .dependencies
            .keys()
            .any(|dependency| dependency.eq_ignore_ascii_case(&manifest.id))
        {
            return Err(anyhow!("package '{}' depends on itself", manifest.id));
        }
        if let Some(worker) = &manifest.worker {
            if worker.host.trim().is_empty() {
                return Err(anyhow!(
                    "package '{}' declares a worker with an empty host name",
                    manifest.id
                ));
            }
        }
        Ok(manifest)
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.id, self.version.to_string())
    }

    pub fn dependency(&self, package_id: &str) -> Option<(&str, &VersionReq)> {
        self.dependencies
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(package_id))
            .map(|(name, requirement)| (name.as_str(), requirement))
    }
}
