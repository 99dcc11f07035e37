use std::collections::BTreeMap;

use nodeagent_core::PackageManifest;
use semver::VersionReq;

use crate::version_allowed;

pub(crate) fn selected_satisfies_constraints(
    selected: &BTreeMap<String, PackageManifest>,
    constraints: &BTreeMap<String, Vec<(String, VersionReq)>>,
    allow_prerelease: bool,
) -> bool {
    selected.iter().all(|(key, manifest)| {
        constraints
            .get(key)
            .map(|reqs| {
                reqs.iter()
                    .all(|(_, req)| version_allowed(&manifest.version, req, allow_prerelease))
            })
            .unwrap_or(true)
    })
}
