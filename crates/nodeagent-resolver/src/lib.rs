mod constraints;
mod framework;
mod order;
mod search;

use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use nodeagent_core::PackageManifest;
use semver::{Prerelease, Version, VersionReq};

use crate::order::topo_order;
use crate::search::search;

pub use framework::{lowest_supported, select_group, FrameworkGroup, TargetFramework};

/// The root package plus every package it pulled in, dependencies ordered
/// before the packages that need them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub root: PackageManifest,
    pub dependencies: Vec<PackageManifest>,
}

impl Resolution {
    pub fn packages(&self) -> impl Iterator<Item = &PackageManifest> {
        std::iter::once(&self.root).chain(self.dependencies.iter())
    }
}

/// Whether `version` may be chosen for `requirement`.
///
/// Prerelease versions are never chosen unless `allow_prerelease` is set.
/// When they are allowed they match by their release part as well, so
/// `2.0.0-beta` satisfies `^2.0`.
pub fn version_allowed(version: &Version, requirement: &VersionReq, allow_prerelease: bool) -> bool {
    if version.pre.is_empty() {
        return requirement.matches(version);
    }
    if !allow_prerelease {
        return false;
    }
    if requirement.matches(version) {
        return true;
    }
    let mut release = version.clone();
    release.pre = Prerelease::EMPTY;
    requirement.matches(&release)
}

pub fn select_latest<'a>(
    candidates: &'a [PackageManifest],
    requirement: &VersionReq,
    allow_prerelease: bool,
) -> Option<&'a PackageManifest> {
    candidates
        .iter()
        .filter(|m| version_allowed(&m.version, requirement, allow_prerelease))
        .max_by(|a, b| a.version.cmp(&b.version))
}

pub fn select_lowest<'a>(
    candidates: &'a [PackageManifest],
    requirement: &VersionReq,
    allow_prerelease: bool,
) -> Option<&'a PackageManifest> {
    candidates
        .iter()
        .filter(|m| version_allowed(&m.version, requirement, allow_prerelease))
        .min_by(|a, b| a.version.cmp(&b.version))
}

/// Resolves the dependency closure of `root`, preferring the lowest version
/// that satisfies every requirement placed on a package.
///
/// `load_versions` returns every known manifest for a package id. An empty
/// list means the package does not exist in any source.
pub fn resolve_dependencies<F>(
    root: &PackageManifest,
    allow_prerelease: bool,
    mut load_versions: F,
) -> Result<Resolution>
where
    F: FnMut(&str) -> Result<Vec<PackageManifest>>,
{
    let root_key = package_key(&root.id);
    let mut constraints: BTreeMap<String, Vec<(String, VersionReq)>> = BTreeMap::new();
    for (dep_name, dep_req) in &root.dependencies {
        constraints
            .entry(package_key(dep_name))
            .or_default()
            .push((dep_name.clone(), dep_req.clone()));
    }

    let mut selected = BTreeMap::new();
    selected.insert(root_key.clone(), root.clone());
    let mut versions_cache = HashMap::new();

    let found = search(
        &mut constraints,
        &mut selected,
        &mut versions_cache,
        allow_prerelease,
        &mut load_versions,
    )?;
    if !found {
        return Err(anyhow!(
            "no consistent set of dependency versions exists for {}",
            root.identity()
        ));
    }

    let ordered = topo_order(&selected)?;
    let dependencies = ordered
        .into_iter()
        .filter(|key| *key != root_key)
        .filter_map(|key| selected.remove(&key))
        .collect();

    Ok(Resolution {
        root: root.clone(),
        dependencies,
    })
}

pub(crate) fn package_key(id: &str) -> String {
    id.trim().to_lowercase()
}

#[cfg(test)]
mod tests;
