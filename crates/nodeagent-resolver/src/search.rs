use std::collections::{BTreeMap, HashMap};

use anyhow::{anyhow, Result};
use nodeagent_core::{AgentError, PackageManifest};
use semver::VersionReq;

use crate::constraints::selected_satisfies_constraints;
use crate::{package_key, version_allowed};

type Constraints = BTreeMap<String, Vec<(String, VersionReq)>>;

pub(crate) fn search<F>(
    constraints: &mut Constraints,
    selected: &mut BTreeMap<String, PackageManifest>,
    versions_cache: &mut HashMap<String, Vec<PackageManifest>>,
    allow_prerelease: bool,
    load_versions: &mut F,
) -> Result<bool>
where
    F: FnMut(&str) -> Result<Vec<PackageManifest>>,
{
    let Some(next) = constraints
        .keys()
        .find(|key| !selected.contains_key(*key))
        .cloned()
    else {
        return Ok(selected_satisfies_constraints(
            selected,
            constraints,
            allow_prerelease,
        ));
    };

    let candidates = matching_candidates(
        &next,
        constraints,
        versions_cache,
        allow_prerelease,
        load_versions,
    )?;

    for candidate in candidates {
        selected.insert(next.clone(), candidate.clone());

        let mut added_constraints: Vec<(String, usize)> = Vec::new();
        for (dep_name, dep_req) in &candidate.dependencies {
            let dep_key = package_key(dep_name);
            let list = constraints.entry(dep_key.clone()).or_default();
            list.push((dep_name.clone(), dep_req.clone()));
            added_constraints.push((dep_key, list.len()));
        }

        let consistent = selected_satisfies_constraints(selected, constraints, allow_prerelease);
        if consistent
            && search(
                constraints,
                selected,
                versions_cache,
                allow_prerelease,
                load_versions,
            )?
        {
            return Ok(true);
        }

        for (dep_key, old_len) in added_constraints {
            if let Some(list) = constraints.get_mut(&dep_key) {
                list.truncate(old_len.saturating_sub(1));
            }
        }
        constraints.retain(|_, reqs| !reqs.is_empty());
        selected.remove(&next);
    }

    Ok(false)
}

fn matching_candidates<F>(
    key: &str,
    constraints: &Constraints,
    versions_cache: &mut HashMap<String, Vec<PackageManifest>>,
    allow_prerelease: bool,
    load_versions: &mut F,
) -> Result<Vec<PackageManifest>>
where
    F: FnMut(&str) -> Result<Vec<PackageManifest>>,
{
    let package_reqs = constraints.get(key).cloned().unwrap_or_default();
    let display_name = package_reqs
        .first()
        .map(|(name, _)| name.clone())
        .unwrap_or_else(|| key.to_string());

    if !versions_cache.contains_key(key) {
        let versions = load_versions(&display_name)?;
        versions_cache.insert(key.to_string(), versions);
    }

    let versions = versions_cache
        .get(key)
        .ok_or_else(|| anyhow!("internal resolver cache error for package '{display_name}'"))?;
    if versions.is_empty() {
        return Err(AgentError::PackageNotFound {
            package: display_name,
        }
        .into());
    }

    let mut matched: Vec<PackageManifest> = versions
        .iter()
        .filter(|manifest| {
            package_reqs
                .iter()
                .all(|(_, req)| version_allowed(&manifest.version, req, allow_prerelease))
        })
        .cloned()
        .collect();
    matched.sort_by(|a, b| a.version.cmp(&b.version));

    Ok(matched)
}
