use std::collections::HashMap;

use nodeagent_core::{AgentError, PackageManifest};
use semver::{Version, VersionReq};

use super::*;

fn manifest(input: &str) -> PackageManifest {
    PackageManifest::from_toml_str(input).expect("manifest must parse")
}

fn simple(id: &str, version: &str) -> PackageManifest {
    manifest(&format!("id = \"{id}\"\nversion = \"{version}\"\n"))
}

fn index(manifests: Vec<PackageManifest>) -> HashMap<String, Vec<PackageManifest>> {
    let mut index: HashMap<String, Vec<PackageManifest>> = HashMap::new();
    for manifest in manifests {
        index
            .entry(manifest.id.to_lowercase())
            .or_default()
            .push(manifest);
    }
    index
}

#[test]
fn selects_latest_and_lowest_matching_versions() {
    let manifests = vec![
        simple("Tool", "1.2.0"),
        simple("Tool", "1.3.0"),
        simple("Tool", "2.0.0-beta.1"),
    ];
    let req = VersionReq::parse(">=1.0").expect("req should parse");

    let latest = select_latest(&manifests, &req, false).expect("must resolve");
    assert_eq!(latest.version.to_string(), "1.3.0");

    let latest_pre = select_latest(&manifests, &req, true).expect("must resolve");
    assert_eq!(latest_pre.version.to_string(), "2.0.0-beta.1");

    let lowest = select_lowest(&manifests, &req, false).expect("must resolve");
    assert_eq!(lowest.version.to_string(), "1.2.0");
}

#[test]
fn prerelease_matches_by_release_part_only_when_allowed() {
    let beta = Version::parse("2.0.0-beta").expect("version");
    let req = VersionReq::parse("^2.0").expect("req");
    assert!(!version_allowed(&beta, &req, false));
    assert!(version_allowed(&beta, &req, true));
}

#[test]
fn resolves_lowest_satisfying_dependency_versions() {
    let root = manifest(
        r#"
id = "Acme.App"
version = "1.0.0"

[dependencies]
"Acme.Common" = ">=1.1"
"NodeAgent.Platform.Sdk" = "=2.0.0"
"#,
    );
    let index = index(vec![
        simple("Acme.Common", "1.0.0"),
        simple("Acme.Common", "1.1.0"),
        simple("Acme.Common", "1.4.0"),
        simple("NodeAgent.Platform.Sdk", "2.0.0"),
        simple("NodeAgent.Platform.Sdk", "2.1.0"),
    ]);

    let resolution = resolve_dependencies(&root, false, |name| {
        Ok(index.get(&name.to_lowercase()).cloned().unwrap_or_default())
    })
    .expect("must resolve");

    assert_eq!(resolution.root.id, "Acme.App");
    let picked: Vec<String> = resolution
        .dependencies
        .iter()
        .map(|m| m.identity().to_string())
        .collect();
    assert_eq!(picked, vec!["acme.common.1.1.0", "nodeagent.platform.sdk.2.0.0"]);
    assert_eq!(resolution.packages().count(), 3);
}

#[test]
fn orders_transitive_dependencies_before_dependents() {
    let root = manifest(
        r#"
id = "App"
version = "1.0.0"

[dependencies]
Zeta = "^1"
"#,
    );
    let zeta = manifest(
        r#"
id = "Zeta"
version = "1.0.0"

[dependencies]
alpha = "^1"
"#,
    );
    let index = index(vec![zeta, simple("Alpha", "1.0.0")]);

    let resolution = resolve_dependencies(&root, false, |name| {
        Ok(index.get(&name.to_lowercase()).cloned().unwrap_or_default())
    })
    .expect("must resolve");

    let ids: Vec<&str> = resolution
        .dependencies
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids, vec!["Alpha", "Zeta"]);
}

#[test]
fn backtracks_when_lowest_candidate_conflicts() {
    let root = manifest(
        r#"
id = "App"
version = "1.0.0"

[dependencies]
Left = "^1"
Shared = ">=1.0"
"#,
    );
    let left_old = manifest(
        r#"
id = "Left"
version = "1.0.0"

[dependencies]
Shared = "<1.0"
"#,
    );
    let left_new = manifest(
        r#"
id = "Left"
version = "1.1.0"

[dependencies]
Shared = "^1.2"
"#,
    );
    let index = index(vec![
        left_old,
        left_new,
        simple("Shared", "0.9.0"),
        simple("Shared", "1.0.0"),
        simple("Shared", "1.2.0"),
    ]);

    let resolution = resolve_dependencies(&root, false, |name| {
        Ok(index.get(&name.to_lowercase()).cloned().unwrap_or_default())
    })
    .expect("must resolve");

    let picked: Vec<String> = resolution
        .dependencies
        .iter()
        .map(|m| format!("{}@{}", m.id, m.version))
        .collect();
    assert!(picked.contains(&"Left@1.1.0".to_string()));
    assert!(picked.contains(&"Shared@1.2.0".to_string()));
}

#[test]
fn missing_dependency_reports_package_not_found() {
    let root = manifest(
        r#"
id = "App"
version = "1.0.0"

[dependencies]
Ghost = "*"
"#,
    );

    let err = resolve_dependencies(&root, false, |_| Ok(Vec::new()))
        .expect_err("unknown dependency must fail");
    let kind = err
        .downcast_ref::<AgentError>()
        .expect("resolver reports a domain error");
    assert!(matches!(kind, AgentError::PackageNotFound { package } if package == "Ghost"));
}

#[test]
fn parses_framework_folders() {
    assert_eq!(
        TargetFramework::parse("net45"),
        Some(TargetFramework::Named {
            family: "net".to_string(),
            version: vec![4, 5],
        })
    );
    assert_eq!(
        TargetFramework::parse("NetStandard2.0"),
        Some(TargetFramework::Named {
            family: "netstandard".to_string(),
            version: vec![2, 0],
        })
    );
    assert_eq!(TargetFramework::parse("2.0"), None);
    assert_eq!(TargetFramework::parse("net4x"), None);
}

#[test]
fn selects_newest_compatible_group_with_neutral_fallback() {
    let groups = vec![
        FrameworkGroup::new(TargetFramework::Any, vec!["any.dll"]),
        FrameworkGroup::new(
            TargetFramework::parse("net40").expect("fw"),
            vec!["net40.dll"],
        ),
        FrameworkGroup::new(
            TargetFramework::parse("net45").expect("fw"),
            vec!["net45.dll"],
        ),
        FrameworkGroup::new(
            TargetFramework::parse("net472").expect("fw"),
            vec!["net472.dll"],
        ),
    ];

    let target = TargetFramework::parse("net46").expect("fw");
    let group = select_group(&groups, Some(&target)).expect("group");
    assert_eq!(group.items, vec!["net45.dll"]);

    let other_family = TargetFramework::parse("netcoreapp3.1").expect("fw");
    let group = select_group(&groups, Some(&other_family)).expect("group");
    assert_eq!(group.items, vec!["any.dll"]);

    let group = select_group(&groups, None).expect("group");
    assert_eq!(group.items, vec!["any.dll"]);

    assert_eq!(
        lowest_supported(&groups),
        TargetFramework::parse("net40")
    );
}
