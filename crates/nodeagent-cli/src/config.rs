use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nodeagent_channel::MIN_CHANNEL_TIMEOUT;
use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE_NAME: &str = "nodeagent.toml";
pub(crate) const CONFIG_ENV: &str = "NODEAGENT_CONFIG";
pub(crate) const WORKER_EXECUTABLE_NAME: &str = "nodeagent-worker";

/// Agent settings from `nodeagent.toml`. Relative paths are read against
/// the directory holding the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AgentConfig {
    pub install_directory: PathBuf,
    pub local_repository: PathBuf,
    pub source_repositories: Vec<PathBuf>,
    pub channel_directory: PathBuf,
    pub channel_timeout_secs: u64,
    pub worker_executable: PathBuf,
    pub platform_sdk_package: String,
    pub platform_package: String,
    pub service_host_package: String,
    pub service_host_version: Option<String>,
    pub delete_attempts: u32,
    pub delete_delay_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            install_directory: PathBuf::from("install"),
            local_repository: PathBuf::from("packages"),
            source_repositories: vec![PathBuf::from("feed")],
            channel_directory: PathBuf::from("channels"),
            channel_timeout_secs: 10,
            worker_executable: PathBuf::from(format!(
                "{WORKER_EXECUTABLE_NAME}{}",
                env::consts::EXE_SUFFIX
            )),
            platform_sdk_package: "NodeAgent.Platform.Sdk".to_string(),
            platform_package: "NodeAgent.Platform".to_string(),
            service_host_package: "NodeAgent.ServiceHost".to_string(),
            service_host_version: None,
            delete_attempts: 24,
            delete_delay_secs: 5,
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse agent configuration")
    }

    /// Loads the configuration from `explicit`, then `NODEAGENT_CONFIG`, then
    /// `nodeagent.toml` next to the executable. Without any file every
    /// setting has its default, relative to the executable's directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match env::var_os(CONFIG_ENV) {
                Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => {
                    let beside = executable_dir()?.join(CONFIG_FILE_NAME);
                    beside.is_file().then_some(beside)
                }
            },
        };

        let Some(path) = path else {
            tracing::debug!("no configuration file, using defaults");
            return Ok(Self::default().resolved_against(&executable_dir()?));
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed reading configuration: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid configuration: {}", path.display()))?;
        let base = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => env::current_dir().context("failed to read current directory")?,
        };
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config.resolved_against(&base))
    }

    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };
        self.install_directory = resolve(&self.install_directory);
        self.local_repository = resolve(&self.local_repository);
        self.source_repositories = self
            .source_repositories
            .iter()
            .map(|source| resolve(source))
            .collect();
        self.channel_directory = resolve(&self.channel_directory);
        self.worker_executable = resolve(&self.worker_executable);
        self
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs).max(MIN_CHANNEL_TIMEOUT)
    }

    pub fn delete_delay(&self) -> Duration {
        Duration::from_secs(self.delete_delay_secs)
    }
}

fn executable_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context("failed to locate the agent executable")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}
