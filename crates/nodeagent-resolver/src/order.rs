use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{anyhow, Result};
use nodeagent_core::PackageManifest;

use crate::package_key;

/// Orders selected packages so every package follows its dependencies.
pub(crate) fn topo_order(selected: &BTreeMap<String, PackageManifest>) -> Result<Vec<String>> {
    let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut in_degree: BTreeMap<String, usize> = BTreeMap::new();

    for (key, manifest) in selected {
        let deps: BTreeSet<String> = manifest
            .dependencies
            .keys()
            .map(|name| package_key(name))
            .filter(|dep_key| selected.contains_key(dep_key))
            .collect();
        in_degree.insert(key.clone(), deps.len());
        for dep_key in deps {
            reverse.entry(dep_key).or_default().insert(key.clone());
        }
    }

    let mut ready: BTreeSet<String> = in_degree
        .iter()
        .filter_map(|(key, degree)| (*degree == 0).then_some(key.clone()))
        .collect();
    let mut ordered = Vec::new();

    while let Some(next) = ready.pop_first() {
        if let Some(dependents) = reverse.get(&next) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.insert(dependent.clone());
                    }
                }
            }
        }
        ordered.push(next);
    }

    if ordered.len() != selected.len() {
        let ordered_set: HashSet<&str> = ordered.iter().map(String::as_str).collect();
        let cycle_nodes = selected
            .values()
            .filter(|manifest| !ordered_set.contains(package_key(&manifest.id).as_str()))
            .map(|manifest| manifest.id.clone())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "dependency cycle detected involving: {}",
            cycle_nodes.join(", ")
        ));
    }

    Ok(ordered)
}
