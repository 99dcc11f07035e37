mod content;
mod feed;
mod fs_ops;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use nodeagent_core::{
    parse_package_version, AgentError, AgentResult, PackageContent, PackageIdentity,
    PackageManifest, MANIFEST_FILE_NAME,
};
use nodeagent_resolver::{
    lowest_supported, resolve_dependencies, select_latest, version_allowed, Resolution,
};
use semver::{Version, VersionReq};

use crate::content::{framework_groups, select_content_files, select_lib_files, LIB_FOLDER};
use crate::feed::{FolderFeed, LocalCache};
use crate::fs_ops::copy_dir_recursive;

pub use feed::FeedPackage;

/// Where packages come from.
pub trait PackageRepository {
    /// Resolves a package and its dependency closure, stages every package
    /// in the local cache, and selects the files to install.
    ///
    /// Without a version the latest matching one is used. A prerelease
    /// version implies `allow_prerelease`.
    fn install(
        &self,
        package_id: &str,
        package_version: Option<&str>,
        allow_prerelease: bool,
    ) -> AgentResult<PackageContent>;

    /// Ids of packages whose id contains `term`, case-insensitively, that
    /// have at least one version visible under the prerelease policy.
    fn search(&self, term: &str, allow_prerelease: bool) -> Result<Vec<String>>;
}

/// A package repository over directory feeds with a local package cache.
///
/// Sources are consulted in order; the first source that knows a version
/// wins. The local cache is the last source, so packages installed once stay
/// resolvable without the feeds.
#[derive(Debug, Clone)]
pub struct FolderPackageRepository {
    sources: Vec<FolderFeed>,
    cache: LocalCache,
}

impl FolderPackageRepository {
    pub fn new(local_repository: impl Into<PathBuf>, sources: &[PathBuf]) -> Self {
        Self {
            sources: sources.iter().map(FolderFeed::open).collect(),
            cache: LocalCache::open(local_repository),
        }
    }

    /// Every known version of `package_id`, newest first.
    pub fn package_versions(&self, package_id: &str) -> Result<Vec<FeedPackage>> {
        let mut by_version: BTreeMap<Version, FeedPackage> = BTreeMap::new();
        for source in &self.sources {
            let packages = source.package_versions(package_id).with_context(|| {
                format!(
                    "failed loading package '{package_id}' from source {}",
                    source.root().display()
                )
            })?;
            for package in packages {
                by_version
                    .entry(package.manifest.version.clone())
                    .or_insert(package);
            }
        }
        for package in self.cache.package_versions(package_id)? {
            by_version
                .entry(package.manifest.version.clone())
                .or_insert(package);
        }

        Ok(by_version.into_values().rev().collect())
    }

    fn find_package(
        &self,
        package_id: &str,
        package_version: Option<&str>,
        allow_prerelease: bool,
    ) -> AgentResult<(FeedPackage, bool)> {
        let requested = match package_version.map(str::trim).filter(|v| !v.is_empty()) {
            Some(version) => Some(parse_package_version(version).ok_or_else(|| {
                AgentError::InvalidVersion {
                    version: version.to_string(),
                }
            })?),
            None => None,
        };
        let versions = self.package_versions(package_id)?;
        let not_found = || AgentError::PackageNotFound {
            package: match package_version {
                Some(version) => format!("{package_id} {}", version.trim()),
                None => package_id.to_string(),
            },
        };

        match requested {
            Some(requested) => {
                let allow_prerelease = allow_prerelease || !requested.pre.is_empty();
                versions
                    .into_iter()
                    .find(|package| package.manifest.version == requested)
                    .map(|package| (package, allow_prerelease))
                    .ok_or_else(not_found)
            }
            None => {
                let manifests: Vec<PackageManifest> =
                    versions.iter().map(|p| p.manifest.clone()).collect();
                let latest = select_latest(&manifests, &VersionReq::STAR, allow_prerelease)
                    .map(|m| m.version.clone())
                    .ok_or_else(not_found)?;
                versions
                    .into_iter()
                    .find(|package| package.manifest.version == latest)
                    .map(|package| (package, allow_prerelease))
                    .ok_or_else(not_found)
            }
        }
    }

    /// Copies `package` into the local cache unless it is already there.
    fn stage_in_cache(&self, package: &FeedPackage) -> Result<PathBuf> {
        let cached = self.cache.package_dir(&package.manifest);
        if cached.is_dir() {
            return Ok(cached);
        }
        if package.root.starts_with(self.cache.root()) {
            return Ok(package.root.clone());
        }

        let staging = self.cache.root().join(format!(
            ".staging-{}-{}.{}",
            std::process::id(),
            package.manifest.id,
            package.manifest.version
        ));
        copy_dir_recursive(&package.root, &staging)?;
        fs::rename(&staging, &cached).with_context(|| {
            format!(
                "failed moving {} into the package cache at {}",
                package.manifest.identity(),
                cached.display()
            )
        })?;
        tracing::debug!(
            package = %package.manifest.identity(),
            path = %cached.display(),
            "cached package"
        );
        Ok(cached)
    }

    fn collect_content(
        &self,
        resolution: &Resolution,
        roots: &[(PackageIdentity, PathBuf)],
    ) -> Result<PackageContent> {
        let root_dir = roots
            .first()
            .map(|(_, dir)| dir.as_path())
            .ok_or_else(|| anyhow::anyhow!("resolution produced no packages"))?;
        let target = lowest_supported(&framework_groups(root_dir, LIB_FOLDER)?);
        if let Some(target) = &target {
            tracing::debug!(package = %resolution.root.identity(), framework = %target, "selected target framework");
        }

        let dependencies = roots.iter().map(|(identity, _)| identity.clone()).collect();
        let mut content = PackageContent::new(resolution.root.identity(), dependencies)
            .with_manifest(resolution.root.clone(), root_dir.join(MANIFEST_FILE_NAME));
        for (identity, dir) in roots {
            content
                .lib_files
                .extend(select_lib_files(dir, target.as_ref())?);
            content
                .content_files
                .extend(select_content_files(dir, &identity.id, target.as_ref())?);
        }
        Ok(content)
    }
}

impl PackageRepository for FolderPackageRepository {
    fn install(
        &self,
        package_id: &str,
        package_version: Option<&str>,
        allow_prerelease: bool,
    ) -> AgentResult<PackageContent> {
        let package_id = package_id.trim();
        let (root, allow_prerelease) =
            self.find_package(package_id, package_version, allow_prerelease)?;

        let mut located: HashMap<PackageIdentity, PathBuf> = HashMap::new();
        located.insert(root.manifest.identity(), root.root.clone());
        let resolution = resolve_dependencies(&root.manifest, allow_prerelease, |name| {
            let packages = self.package_versions(name)?;
            let manifests = packages.iter().map(|p| p.manifest.clone()).collect();
            for package in packages {
                located.insert(package.manifest.identity(), package.root);
            }
            Ok(manifests)
        })
        .with_context(|| format!("failed resolving dependencies of {}", root.manifest.identity()))?;

        let mut roots = Vec::new();
        for manifest in resolution.packages() {
            let identity = manifest.identity();
            let source = located
                .get(&identity)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("resolved package {identity} has no location"))?;
            let cached = self.stage_in_cache(&FeedPackage {
                manifest: manifest.clone(),
                root: source,
            })?;
            roots.push((identity, cached));
        }

        tracing::info!(
            package = %resolution.root.identity(),
            dependencies = resolution.dependencies.len(),
            "resolved package"
        );
        Ok(self.collect_content(&resolution, &roots)?)
    }

    fn search(&self, term: &str, allow_prerelease: bool) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for source in &self.sources {
            for candidate in source.search_ids(term)? {
                let visible = self
                    .package_versions(&candidate)?
                    .into_iter()
                    .filter(|package| {
                        version_allowed(&package.manifest.version, &VersionReq::STAR, allow_prerelease)
                    })
                    .max_by(|a, b| a.manifest.version.cmp(&b.manifest.version));
                if let Some(package) = visible {
                    if seen.insert(package.manifest.id.to_lowercase()) {
                        ids.push(package.manifest.id);
                    }
                }
            }
        }

        ids.sort_by_key(|id| id.to_lowercase());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests;
