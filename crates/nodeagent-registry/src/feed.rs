use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nodeagent_core::{PackageManifest, MANIFEST_FILE_NAME};
use semver::Version;

/// A package version found on disk, either in a feed or in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPackage {
    pub manifest: PackageManifest,
    pub root: PathBuf,
}

/// A directory feed laid out as `<source>/<id>/<version>/package.toml`.
#[derive(Debug, Clone)]
pub(crate) struct FolderFeed {
    root: PathBuf,
}

impl FolderFeed {
    pub(crate) fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Package directory names containing `needle`, case-insensitively.
    pub(crate) fn search_ids(&self, needle: &str) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let needle = needle.trim().to_lowercase();
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to read package source {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.to_lowercase().contains(&needle) {
                ids.push(name);
            }
        }

        ids.sort();
        Ok(ids)
    }

    pub(crate) fn package_versions(&self, package_id: &str) -> Result<Vec<FeedPackage>> {
        let Some(package_dir) = find_child_dir(&self.root, package_id)? else {
            return Ok(Vec::new());
        };

        let mut packages = Vec::new();
        for entry in fs::read_dir(&package_dir)
            .with_context(|| format!("failed to read package directory: {package_id}"))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let root = entry.path();
            if let Some(package) = read_package(&root)? {
                if package.manifest.id.eq_ignore_ascii_case(package_id) {
                    packages.push(package);
                }
            }
        }

        packages.sort_by(|a, b| b.manifest.version.cmp(&a.manifest.version));
        Ok(packages)
    }
}

/// The local package cache: one `<id>.<version>/` directory per package.
#[derive(Debug, Clone)]
pub(crate) struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub(crate) fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn package_dir(&self, manifest: &PackageManifest) -> PathBuf {
        self.root.join(format!("{}.{}", manifest.id, manifest.version))
    }

    pub(crate) fn package_versions(&self, package_id: &str) -> Result<Vec<FeedPackage>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut packages = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to read package cache {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if cached_version(&name, package_id).is_none() {
                continue;
            }
            if let Some(package) = read_package(&entry.path())? {
                if package.manifest.id.eq_ignore_ascii_case(package_id) {
                    packages.push(package);
                }
            }
        }

        packages.sort_by(|a, b| b.manifest.version.cmp(&a.manifest.version));
        Ok(packages)
    }
}

fn cached_version(dir_name: &str, package_id: &str) -> Option<Version> {
    let prefix = dir_name.get(..package_id.len())?;
    if !prefix.eq_ignore_ascii_case(package_id) {
        return None;
    }
    let rest = dir_name.get(package_id.len()..)?.strip_prefix('.')?;
    Version::parse(rest).ok()
}

fn find_child_dir(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let exact = root.join(name);
    if exact.is_dir() {
        return Ok(Some(exact));
    }

    for entry in
        fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .eq_ignore_ascii_case(name)
        {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

fn read_package(root: &Path) -> Result<Option<FeedPackage>> {
    let manifest_path = root.join(MANIFEST_FILE_NAME);
    if !manifest_path.is_file() {
        return Ok(None);
    }

    let content = fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed reading manifest: {}", manifest_path.display()))?;
    let manifest = PackageManifest::from_toml_str(&content)
        .with_context(|| format!("failed parsing manifest: {}", manifest_path.display()))?;
    Ok(Some(FeedPackage {
        manifest,
        root: root.to_path_buf(),
    }))
}
