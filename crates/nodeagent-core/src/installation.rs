use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::identity::{app_name, PackageIdentity, INSTANCE_DELIMITER};

pub const SERVICE_FILE_NAME: &str = "service.toml";
pub const WORKER_PID_FILE_NAME: &str = "worker.pid";

/// One on-disk installation: `<root>/<id>.<version>[@<instance>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRecord {
    pub package_id: String,
    pub package_version: String,
    pub instance: String,
    pub directory: PathBuf,
}

impl InstallationRecord {
    pub fn new(
        root: &Path,
        package_id: &str,
        package_version: &str,
        instance: Option<&str>,
    ) -> Self {
        let package_id = package_id.trim().to_string();
        let package_version = package_version.trim().to_string();
        let instance = instance.unwrap_or_default().trim().to_string();
        let directory = root.join(Self::directory_name(
            &package_id,
            &package_version,
            &instance,
        ));
        Self {
            package_id,
            package_version,
            instance,
            directory,
        }
    }

    pub fn for_identity(root: &Path, identity: &PackageIdentity, instance: Option<&str>) -> Self {
        Self::new(root, &identity.id, &identity.version, instance)
    }

    /// The only function that turns an installation address into a directory
    /// name. Creation, lookup, and deletion all go through it.
    pub fn directory_name(package_id: &str, package_version: &str, instance: &str) -> String {
        app_name(package_id, package_version, instance)
    }

    /// Parses the final component of `path`. Returns `None` for names that do
    /// not follow `<id>.<version>[@<instance>]`.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let captures = directory_name_pattern().captures(name)?;

        let package_id = captures.name("id")?.as_str();
        let package_version = captures.name("version")?.as_str();
        let instance = captures.name("instance").map(|m| m.as_str());

        if package_id.trim().is_empty() {
            return None;
        }

        Some(Self {
            package_id: package_id.to_string(),
            package_version: package_version.to_string(),
            instance: instance.unwrap_or_default().to_string(),
            directory: path.to_path_buf(),
        })
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.package_id, &self.package_version)
    }

    pub fn app_name(&self) -> String {
        app_name(&self.package_id, &self.package_version, &self.instance)
    }

    /// Service registration written when the installation is registered.
    pub fn service_file(&self) -> PathBuf {
        self.directory.join(SERVICE_FILE_NAME)
    }

    /// Written by a running worker, removed when it exits.
    pub fn pid_file(&self) -> PathBuf {
        self.directory.join(WORKER_PID_FILE_NAME)
    }

    pub fn instance(&self) -> Option<&str> {
        if self.instance.is_empty() {
            None
        } else {
            Some(&self.instance)
        }
    }
}

impl fmt::Display for InstallationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.app_name())
    }
}

fn directory_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"^(?P<id>.*?)\.(?P<version>[0-9]+(?:\.[0-9]+(?:\.[0-9]+(?:\.[0-9]+)?)?)?(?:-[^{d}]*?)?)(?:{d}(?P<instance>[^{d}]+))?$",
            d = INSTANCE_DELIMITER
        );
        Regex::new(&pattern).expect("directory name pattern must compile")
    })
}

/// Optional id/version/instance filter over installations. Each filter is
/// trimmed and matched case-insensitively; a blank filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationFilter {
    pub id: Option<String>,
    pub version: Option<String>,
    pub instance: Option<String>,
}

impl InstallationFilter {
    pub fn new(id: Option<&str>, version: Option<&str>, instance: Option<&str>) -> Self {
        Self {
            id: id.map(str::to_string),
            version: version.map(str::to_string),
            instance: instance.map(str::to_string),
        }
    }

    pub fn matches(&self, record: &InstallationRecord) -> bool {
        field_matches(self.id.as_deref(), &record.package_id)
            && field_matches(self.version.as_deref(), &record.package_version)
            && field_matches(self.instance.as_deref(), &record.instance)
    }
}

impl fmt::Display for InstallationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("*")
                .to_string()
        };
        write!(
            f,
            "id={}, version={}, instance={}",
            show(&self.id),
            show(&self.version),
            show(&self.instance)
        )
    }
}

fn field_matches(filter: Option<&str>, value: &str) -> bool {
    match filter.map(str::trim) {
        None | Some("") => true,
        Some(expected) => expected.to_lowercase() == value.trim().to_lowercase(),
    }
}
