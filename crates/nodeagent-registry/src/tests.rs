use std::fs;
use std::path::{Path, PathBuf};

use nodeagent_core::AgentError;

use super::*;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, content).expect("must write file");
}

fn publish(source: &Path, id: &str, version: &str, deps: &[(&str, &str)], files: &[&str]) -> PathBuf {
    let root = source.join(id).join(version);
    let mut manifest = format!("id = \"{id}\"\nversion = \"{version}\"\n");
    if !deps.is_empty() {
        manifest.push_str("\n[dependencies]\n");
        for (name, req) in deps {
            manifest.push_str(&format!("\"{name}\" = \"{req}\"\n"));
        }
    }
    write_file(&root.join(MANIFEST_FILE_NAME), &manifest);
    for file in files {
        write_file(&root.join(file), file);
    }
    root
}

fn install_paths(files: &[nodeagent_core::PackageFile]) -> Vec<String> {
    files
        .iter()
        .map(|file| file.install_path.to_string_lossy().replace('\\', "/"))
        .collect()
}

#[test]
fn install_resolves_latest_version_and_selects_framework_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("feed");
    let cache = temp.path().join("packages");

    publish(&source, "Acme.App", "1.0.0", &[], &["lib/app.dll"]);
    publish(
        &source,
        "Acme.App",
        "1.1.0",
        &[("Acme.Common", ">=1.0")],
        &["lib/net45/app.dll", "lib/net40/old.dll", "content/appsettings.json"],
    );
    publish(
        &source,
        "Acme.Common",
        "1.0.0",
        &[],
        &["lib/net40/common.dll", "lib/net472/common.dll", "content/net40/data/seed.sql"],
    );
    publish(&source, "Acme.Common", "2.0.0", &[], &["lib/common.dll"]);

    let repository = FolderPackageRepository::new(&cache, &[source]);
    let content = repository
        .install("acme.app", None, false)
        .expect("install must resolve");

    assert_eq!(content.identity, PackageIdentity::new("Acme.App", "1.1.0"));
    assert!(content.find_dependency("Acme.Common").is_some());
    assert_eq!(
        content
            .find_dependency("acme.common")
            .map(|identity| identity.version.clone()),
        Some("1.0.0".to_string())
    );
    assert!(content.declares_dependency("ACME.COMMON"));

    assert_eq!(
        install_paths(&content.lib_files),
        vec!["old.dll", "common.dll"],
        "target is the root's lowest framework, net40"
    );
    assert_eq!(
        install_paths(&content.content_files),
        vec!["content/Acme.App/appsettings.json", "content/Acme.Common/data/seed.sql"]
    );

    for file in content.lib_files.iter().chain(content.content_files.iter()) {
        assert!(file.source_path.starts_with(&cache), "files come from the cache");
        assert!(file.source_path.is_file());
    }
    let manifest_path = content.manifest_path.expect("manifest path");
    assert!(manifest_path.is_file());
    assert!(cache.join("Acme.App.1.1.0").is_dir());
}

#[test]
fn prerelease_version_request_allows_prerelease_dependencies() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("feed");

    publish(&source, "Tool", "2.0.0-beta.1", &[("Tool.Sdk", "^2.0")], &["lib/tool"]);
    publish(&source, "Tool.Sdk", "2.0.0-beta.1", &[], &["lib/sdk"]);

    let repository = FolderPackageRepository::new(temp.path().join("packages"), &[source]);

    let err = repository
        .install("Tool", None, false)
        .expect_err("stable-only install must not see prereleases");
    assert!(matches!(err.kind(), AgentError::PackageNotFound { .. }));

    let content = repository
        .install("Tool", Some("2.0.0-beta.1"), false)
        .expect("explicit prerelease must install");
    assert_eq!(content.dependencies.len(), 2);
}

#[test]
fn unknown_package_or_version_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("feed");
    publish(&source, "Acme", "1.0.0", &[("Ghost", "*")], &[]);

    let repository = FolderPackageRepository::new(temp.path().join("packages"), &[source]);

    let err = repository.install("Missing", None, false).expect_err("must fail");
    assert!(matches!(err.kind(), AgentError::PackageNotFound { package } if package == "Missing"));

    let err = repository
        .install("Acme", Some("9.9.9"), false)
        .expect_err("must fail");
    assert!(matches!(err.kind(), AgentError::PackageNotFound { .. }));

    let err = repository
        .install("Acme", Some("1.0.0"), false)
        .expect_err("missing dependency must fail");
    assert!(matches!(err.kind(), AgentError::PackageNotFound { package } if package == "Ghost"));
}

#[test]
fn short_version_requests_match_full_versions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("feed");
    publish(&source, "Acme", "1.0.0", &[], &["lib/acme.dll"]);
    publish(&source, "Acme", "1.2.0", &[], &["lib/acme.dll"]);

    let repository = FolderPackageRepository::new(temp.path().join("packages"), &[source]);

    let content = repository
        .install("Acme", Some("1.0"), false)
        .expect("short version must resolve");
    assert_eq!(content.identity.version, "1.0.0");

    let content = repository
        .install("Acme", Some("1"), false)
        .expect("major-only version must resolve");
    assert_eq!(content.identity.version, "1.0.0");

    for version in ["1.0.0+build.5", "latest", "1.0.0.0"] {
        let err = repository
            .install("Acme", Some(version), false)
            .expect_err("malformed version must fail");
        assert!(
            matches!(err.kind(), AgentError::InvalidVersion { version: v } if v == version),
            "{version}: {err}"
        );
    }
}

#[test]
fn cached_packages_resolve_without_sources() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = temp.path().join("feed");
    let cache = temp.path().join("packages");
    publish(&source, "Acme", "1.0.0", &[], &["lib/acme.dll"]);

    FolderPackageRepository::new(&cache, &[source.clone()])
        .install("Acme", None, false)
        .expect("first install");
    fs::remove_dir_all(&source).expect("remove feed");

    let offline = FolderPackageRepository::new(&cache, &[source]);
    let content = offline
        .install("Acme", Some("1.0.0"), false)
        .expect("cache must serve the package");
    assert_eq!(install_paths(&content.lib_files), vec!["acme.dll"]);
}

#[test]
fn search_matches_case_insensitively_and_honors_prerelease_flag() {
    let temp = tempfile::tempdir().expect("tempdir");
    let first = temp.path().join("first");
    let second = temp.path().join("second");

    publish(&first, "Acme.Billing", "1.0.0", &[], &[]);
    publish(&second, "Acme.Billing", "1.1.0", &[], &[]);
    publish(&second, "Acme.Preview", "0.1.0-alpha", &[], &[]);
    publish(&second, "Other", "1.0.0", &[], &[]);

    let repository = FolderPackageRepository::new(temp.path().join("packages"), &[first, second]);

    assert_eq!(
        repository.search("ACME", false).expect("search"),
        vec!["Acme.Billing"]
    );
    assert_eq!(
        repository.search("acme", true).expect("search"),
        vec!["Acme.Billing", "Acme.Preview"]
    );
    assert!(repository.search("nothing", true).expect("search").is_empty());
}
