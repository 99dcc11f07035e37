use std::path::PathBuf;
use std::time::Duration;

use crate::identity::app_name;
use crate::installation::InstallationRecord;

/// Addressing and configuration passed to every service control operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub package_id: String,
    pub package_version: String,
    pub instance: String,
    pub directory: PathBuf,
    pub config_path: Option<PathBuf>,
    /// `None` waits without limit.
    pub timeout: Option<Duration>,
}

impl ServiceOptions {
    pub fn from_installation(installation: &InstallationRecord) -> Self {
        Self {
            package_id: installation.package_id.clone(),
            package_version: installation.package_version.clone(),
            instance: installation.instance.clone(),
            directory: installation.directory.clone(),
            config_path: None,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config_path(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    /// Service and channel name of the installation.
    pub fn app_name(&self) -> String {
        app_name(&self.package_id, &self.package_version, &self.instance)
    }

    /// Worker command line for `verb`, omitting blank options.
    pub fn worker_args(&self, verb: &str) -> Vec<String> {
        let mut args = vec![verb.to_string()];
        push_option(&mut args, "--package-id", &self.package_id);
        push_option(&mut args, "--package-version", &self.package_version);
        push_option(&mut args, "--package-instance", &self.instance);
        push_option(
            &mut args,
            "--package-directory",
            &self.directory.display().to_string(),
        );
        if let Some(config_path) = &self.config_path {
            push_option(&mut args, "--package-config", &config_path.display().to_string());
        }
        if let Some(timeout) = self.timeout {
            push_option(&mut args, "--package-timeout", &timeout.as_secs().to_string());
        }
        args
    }
}

fn push_option(args: &mut Vec<String>, name: &str, value: &str) {
    let value = value.trim();
    if !value.is_empty() {
        args.push(name.to_string());
        args.push(value.to_string());
    }
}
