use std::path::PathBuf;

use crate::identity::PackageIdentity;
use crate::manifest::PackageManifest;

/// A copy instruction: where a file lives in the package cache and where it
/// lands relative to its target directory inside an installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub source_path: PathBuf,
    pub install_path: PathBuf,
}

impl PackageFile {
    pub fn new(source_path: impl Into<PathBuf>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            install_path: install_path.into(),
        }
    }
}

/// Files selected from a resolved package and every package it pulled in.
///
/// `lib_files` install relative to the package's lib target directory.
/// `content_files` already carry their `content/<packageId>/` prefix.
/// `dependencies` holds every resolved package, the root included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContent {
    pub identity: PackageIdentity,
    pub dependencies: Vec<PackageIdentity>,
    pub lib_files: Vec<PackageFile>,
    pub content_files: Vec<PackageFile>,
    pub manifest: Option<PackageManifest>,
    pub manifest_path: Option<PathBuf>,
}

impl PackageContent {
    pub fn new(identity: PackageIdentity, dependencies: Vec<PackageIdentity>) -> Self {
        Self {
            identity,
            dependencies,
            lib_files: Vec::new(),
            content_files: Vec::new(),
            manifest: None,
            manifest_path: None,
        }
    }

    pub fn with_manifest(mut self, manifest: PackageManifest, path: impl Into<PathBuf>) -> Self {
        self.manifest = Some(manifest);
        self.manifest_path = Some(path.into());
        self
    }

    /// Whether the root package itself declares a dependency on `package_id`.
    pub fn declares_dependency(&self, package_id: &str) -> bool {
        self.manifest
            .as_ref()
            .is_some_and(|manifest| manifest.dependency(package_id).is_some())
    }

    pub fn find_dependency(&self, package_id: &str) -> Option<&PackageIdentity> {
        self.dependencies
            .iter()
            .find(|dependency| dependency.has_id(package_id))
    }
}
