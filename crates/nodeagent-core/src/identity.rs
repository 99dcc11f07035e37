use std::fmt;
use std::hash::{Hash, Hasher};

use semver::Version;
use serde::{Deserialize, Serialize};

pub const INSTANCE_DELIMITER: char = '@';

/// A package id paired with one concrete version.
///
/// Both parts compare case-insensitively, so `Foo.1.0.0-Beta` and
/// `foo.1.0.0-beta` name the same package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub id: String,
    pub version: String,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id.trim().to_lowercase() == id.trim().to_lowercase()
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.has_id(&other.id)
            && self.version.trim().to_lowercase() == other.version.trim().to_lowercase()
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.trim().to_lowercase().hash(state);
        self.version.trim().to_lowercase().hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id.trim(), self.version.trim())
    }
}

/// Canonical application name shared by the installation directory and the
/// control channel: `<id>[.<version>][@<instance>]`. Blank parts are omitted.
pub fn app_name(package_id: &str, package_version: &str, instance: &str) -> String {
    let package_id = package_id.trim();
    let package_version = package_version.trim();
    let instance = instance.trim();

    let mut name = if package_version.is_empty() {
        package_id.to_string()
    } else {
        format!("{package_id}.{package_version}")
    };
    if !instance.is_empty() {
        name.push(INSTANCE_DELIMITER);
        name.push_str(instance);
    }
    name
}

/// Ids that survive a directory-name round trip: no delimiter or path
/// characters, and no segment after the first dot that starts with a digit
/// (that would be read back as the start of the version).
pub fn is_valid_package_id(id: &str) -> bool {
    if id.is_empty() || id.trim() != id {
        return false;
    }
    if id
        .chars()
        .any(|ch| ch == INSTANCE_DELIMITER || ch == '/' || ch == '\\' || ch.is_whitespace())
    {
        return false;
    }
    let mut segments = id.split('.');
    let leading_ok = segments.next().is_some_and(|segment| !segment.is_empty());
    leading_ok
        && segments.all(|segment| {
            segment
                .chars()
                .next()
                .is_some_and(|first| !first.is_ascii_digit())
        })
}

/// Instance names become the last segment of a directory name, so they may
/// not contain path separators, the delimiter, whitespace or `..`.
pub fn is_valid_instance(instance: &str) -> bool {
    let instance = instance.trim();
    !instance.is_empty()
        && !instance.contains("..")
        && !instance
            .chars()
            .any(|ch| ch == INSTANCE_DELIMITER || ch == '/' || ch == '\\' || ch.is_whitespace())
}

/// Parses a user supplied version, padding `1` and `1.2` to three parts.
/// Build metadata and four-part versions are rejected because no package
/// can carry them.
pub fn parse_package_version(input: &str) -> Option<Version> {
    let input = input.trim();
    if input.contains('+') {
        return None;
    }
    let (release, prerelease) = match input.split_once('-') {
        Some((release, prerelease)) => (release, Some(prerelease)),
        None => (input, None),
    };
    let padded = match release.split('.').count() {
        1 => format!("{release}.0.0"),
        2 => format!("{release}.0"),
        3 => release.to_string(),
        _ => return None,
    };
    let normalized = match prerelease {
        Some(prerelease) => format!("{padded}-{prerelease}"),
        None => padded,
    };
    Version::parse(&normalized).ok()
}
