use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use nodeagent_core::{
    is_valid_instance, parse_package_version, AgentError, AgentResult, InstallationRecord,
    PackageContent, PackageIdentity, ServiceOptions, MANIFEST_FILE_NAME,
};
use nodeagent_installer::{FileCopier, TransactionError, TransactionManager};

use crate::context::Agent;
use crate::services::ServiceDefinition;

#[derive(Debug, Clone, Default)]
pub(crate) struct InstallRequest {
    pub package_id: String,
    pub package_version: Option<String>,
    pub instance: Option<String>,
    pub allow_prerelease: bool,
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct InstallContext {
    app: Option<PackageContent>,
    installation: Option<InstallationRecord>,
    sdk: Option<PackageIdentity>,
    platform: Option<PackageContent>,
    service_host: Option<PackageContent>,
    created_directory: bool,
    config_path: Option<PathBuf>,
    service: Option<ServiceDefinition>,
}

impl InstallContext {
    fn app(&self) -> AgentResult<&PackageContent> {
        self.app
            .as_ref()
            .ok_or_else(|| anyhow!("application package is not resolved").into())
    }

    fn installation(&self) -> AgentResult<&InstallationRecord> {
        self.installation
            .as_ref()
            .ok_or_else(|| anyhow!("installation directory is not known").into())
    }
}

/// Failure of the install command: either the quick pre-check or the staged
/// transaction.
#[derive(Debug)]
pub(crate) enum InstallFailure {
    Rejected(AgentError),
    Transaction(TransactionError),
}

impl InstallFailure {
    pub fn kind(&self) -> Option<&AgentError> {
        match self {
            Self::Rejected(error) => Some(error.kind()),
            Self::Transaction(error) => error.error().map(AgentError::kind),
        }
    }
}

impl std::fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(error) => error.fmt(f),
            Self::Transaction(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for InstallFailure {}

pub(crate) fn run_install(
    agent: &Agent<'_>,
    request: &InstallRequest,
) -> Result<InstallationRecord, InstallFailure> {
    let instance = request
        .instance
        .as_deref()
        .map(str::trim)
        .filter(|instance| !instance.is_empty());
    if let Some(instance) = instance.filter(|instance| !is_valid_instance(instance)) {
        return Err(InstallFailure::Rejected(AgentError::InvalidInstance {
            instance: instance.to_string(),
        }));
    }

    let package_version = match request
        .package_version
        .as_deref()
        .map(str::trim)
        .filter(|version| !version.is_empty())
    {
        Some(version) => Some(
            parse_package_version(version)
                .ok_or_else(|| {
                    InstallFailure::Rejected(AgentError::InvalidVersion {
                        version: version.to_string(),
                    })
                })?
                .to_string(),
        ),
        None => None,
    };

    if let Some(version) = package_version.as_deref() {
        let planned = agent
            .layout
            .path_for(&request.package_id, version, instance);
        if agent.layout.exists(&planned) {
            return Err(InstallFailure::Rejected(AgentError::AlreadyInstalled {
                installation: planned.app_name(),
                directory: planned.directory,
            }));
        }
    }

    let config = agent.config;
    let mut context = InstallContext::default();
    let mut transaction = TransactionManager::new("Install")
        .stage("ResolveAppPackage", |ctx: &mut InstallContext| {
            let content = agent.repository.install(
                &request.package_id,
                package_version.as_deref(),
                request.allow_prerelease,
            )?;
            tracing::info!(package = %content.identity, "resolved application package");
            ctx.app = Some(content);
            Ok(())
        })
        .stage("CheckNotAlreadyInstalled", |ctx: &mut InstallContext| {
            let identity = &ctx.app()?.identity;
            let installation =
                agent
                    .layout
                    .path_for(&identity.id, &identity.version, instance);
            if agent.layout.exists(&installation) {
                return Err(AgentError::AlreadyInstalled {
                    installation: installation.app_name(),
                    directory: installation.directory,
                });
            }
            ctx.installation = Some(installation);
            Ok(())
        })
        .stage("ResolvePlatformDependency", |ctx: &mut InstallContext| {
            let app = ctx.app()?;
            let sdk_id = &config.platform_sdk_package;
            let sdk = app
                .declares_dependency(sdk_id)
                .then(|| app.find_dependency(sdk_id))
                .flatten()
                .cloned()
                .ok_or_else(|| AgentError::MissingPlatformDependency {
                    package: app.identity.to_string(),
                    dependency: sdk_id.clone(),
                })?;
            tracing::info!(sdk = %sdk, "found platform dependency");
            ctx.sdk = Some(sdk);
            Ok(())
        })
        .stage("ResolvePlatformPackage", |ctx: &mut InstallContext| {
            let sdk = ctx
                .sdk
                .as_ref()
                .ok_or_else(|| anyhow!("platform dependency is not resolved"))?;
            let platform = agent.repository.install(
                &config.platform_package,
                Some(sdk.version.as_str()),
                request.allow_prerelease,
            )?;
            ctx.platform = Some(platform);
            Ok(())
        })
        .stage("ResolveServiceHostPackage", |ctx: &mut InstallContext| {
            let host = agent.repository.install(
                &config.service_host_package,
                config.service_host_version.as_deref(),
                request.allow_prerelease,
            )?;
            ctx.service_host = Some(host);
            Ok(())
        })
        .stage_with_rollback(
            "CopyFiles",
            |ctx: &mut InstallContext| copy_files(agent, request, ctx),
            |ctx: &mut InstallContext| {
                if !ctx.created_directory {
                    return Ok(());
                }
                let installation = ctx.installation()?;
                if installation.directory.exists() {
                    fs::remove_dir_all(&installation.directory).with_context(|| {
                        format!(
                            "failed removing installation directory {}",
                            installation.directory.display()
                        )
                    })?;
                }
                ctx.created_directory = false;
                Ok(())
            },
        )
        .stage_with_rollback(
            "RegisterService",
            |ctx: &mut InstallContext| {
                let installation = ctx.installation()?;
                let options = ServiceOptions::from_installation(installation)
                    .with_config_path(ctx.config_path.clone());
                let service = agent.service_definition(&options, "run");
                ctx.service = Some(service.clone());
                agent.services.install_service(&service)
            },
            |ctx: &mut InstallContext| match (&ctx.service, &ctx.installation) {
                (Some(_), Some(installation)) => agent.services.uninstall_service(installation),
                _ => Ok(()),
            },
        );

    transaction
        .execute(&mut context)
        .map_err(InstallFailure::Transaction)?;

    context
        .installation
        .ok_or_else(|| InstallFailure::Rejected(anyhow!("install finished without a directory").into()))
}

fn copy_files(
    agent: &Agent<'_>,
    request: &InstallRequest,
    ctx: &mut InstallContext,
) -> AgentResult<()> {
    let installation = ctx.installation()?.clone();
    ctx.created_directory = agent.layout.create(&installation)?;

    let app = ctx.app()?;
    let platform = ctx
        .platform
        .as_ref()
        .ok_or_else(|| anyhow!("platform package is not resolved"))?;
    let service_host = ctx
        .service_host
        .as_ref()
        .ok_or_else(|| anyhow!("service host package is not resolved"))?;

    let root = installation.directory.clone();
    let mut copier = FileCopier::new();
    copier.copy_all(&service_host.lib_files, &root)?;
    copier.copy_all(&platform.lib_files, &agent.layout.platform_dir(&installation))?;
    copier.copy_all(&app.lib_files, &agent.layout.app_dir(&installation))?;
    if let Some(manifest_path) = &app.manifest_path {
        copier.copy(
            manifest_path,
            &agent.layout.app_dir(&installation).join(MANIFEST_FILE_NAME),
        )?;
    }
    for package in [service_host, platform, app] {
        copier.copy_all(&package.content_files, &root)?;
    }

    if let Some(config_file) = &request.config_file {
        let file_name = config_file
            .file_name()
            .ok_or_else(|| anyhow!("config file has no name: {}", config_file.display()))?;
        let destination = root.join(file_name);
        copier.copy(config_file, &destination)?;
        ctx.config_path = Some(destination);
    }

    tracing::info!(
        installation = %installation,
        files = copier.written_count(),
        "copied installation files"
    );
    Ok(())
}
