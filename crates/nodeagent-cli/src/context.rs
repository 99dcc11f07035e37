use std::env;
use std::path::PathBuf;
use std::time::Duration;

use nodeagent_channel::ServiceHostClient;
use nodeagent_core::{InstallationRecord, ServiceOptions};
use nodeagent_installer::InstallDirectory;
use nodeagent_registry::PackageRepository;

use crate::config::{AgentConfig, WORKER_EXECUTABLE_NAME};
use crate::services::{ProcessInspector, ServiceDefinition, ServiceManager};

/// Everything a command needs, wired once per invocation.
pub(crate) struct Agent<'a> {
    pub config: &'a AgentConfig,
    pub layout: InstallDirectory,
    pub repository: &'a dyn PackageRepository,
    pub services: &'a dyn ServiceManager,
    pub inspector: &'a dyn ProcessInspector,
}

impl<'a> Agent<'a> {
    pub fn new(
        config: &'a AgentConfig,
        repository: &'a dyn PackageRepository,
        services: &'a dyn ServiceManager,
        inspector: &'a dyn ProcessInspector,
    ) -> Self {
        Self {
            config,
            layout: InstallDirectory::new(&config.install_directory),
            repository,
            services,
            inspector,
        }
    }

    /// A channel client whose default timeout is the configured one, raised
    /// to the timeout carried by `options`.
    pub fn host_client(&self, options: &ServiceOptions) -> ServiceHostClient {
        let timeout = self
            .config
            .channel_timeout()
            .max(options.timeout.unwrap_or_default());
        ServiceHostClient::new(&self.config.channel_directory, options, timeout)
    }

    /// The worker shipped by the service-host package, or the configured one.
    pub fn worker_executable(&self, installation: &InstallationRecord) -> PathBuf {
        let shipped = installation
            .directory
            .join(format!("{WORKER_EXECUTABLE_NAME}{}", env::consts::EXE_SUFFIX));
        if shipped.is_file() {
            shipped
        } else {
            self.config.worker_executable.clone()
        }
    }

    /// The service definition running `verb` for an installation.
    pub fn service_definition(&self, options: &ServiceOptions, verb: &str) -> ServiceDefinition {
        let installation = InstallationRecord {
            package_id: options.package_id.clone(),
            package_version: options.package_version.clone(),
            instance: options.instance.clone(),
            directory: options.directory.clone(),
        };
        let mut args = options.worker_args(verb);
        args.push("--channel-directory".to_string());
        args.push(self.config.channel_directory.display().to_string());
        ServiceDefinition::new(options, &self.worker_executable(&installation), args)
    }

    pub fn delete_attempts(&self) -> (u32, Duration) {
        (self.config.delete_attempts, self.config.delete_delay())
    }
}
