use std::cmp::Ordering;
use std::fmt;

/// A framework folder under `lib/` or `content/`.
///
/// Files placed directly in `lib/` belong to [`TargetFramework::Any`].
/// Named folders are a lowercase family followed by a version: `net45`
/// reads as `net` 4.5, `netstandard2.0` as `netstandard` 2.0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetFramework {
    Any,
    Named { family: String, version: Vec<u32> },
}

impl TargetFramework {
    pub fn parse(folder: &str) -> Option<Self> {
        let folder = folder.trim();
        let split = folder
            .find(|ch: char| ch.is_ascii_digit())
            .unwrap_or(folder.len());
        let (family, version) = folder.split_at(split);
        if family.is_empty() || !family.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return None;
        }

        let version = if version.is_empty() {
            Vec::new()
        } else if version.contains('.') {
            version
                .split('.')
                .map(|part| part.parse::<u32>().ok())
                .collect::<Option<Vec<_>>>()?
        } else {
            version
                .chars()
                .map(|ch| ch.to_digit(10))
                .collect::<Option<Vec<_>>>()?
        };

        Some(Self::Named {
            family: family.to_ascii_lowercase(),
            version,
        })
    }

    /// Whether files built for `self` can run on `target`.
    pub fn is_compatible_with(&self, target: &TargetFramework) -> bool {
        match (self, target) {
            (Self::Any, _) => true,
            (Self::Named { .. }, Self::Any) => false,
            (
                Self::Named { family, version },
                Self::Named {
                    family: target_family,
                    version: target_version,
                },
            ) => {
                family.eq_ignore_ascii_case(target_family)
                    && compare_versions(version, target_version) != Ordering::Greater
            }
        }
    }

    fn sort_key(&self) -> Option<(&str, &[u32])> {
        match self {
            Self::Any => None,
            Self::Named { family, version } => Some((family.as_str(), version.as_slice())),
        }
    }
}

impl fmt::Display for TargetFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Named { family, version } => {
                let version = version
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(".");
                write!(f, "{family}{version}")
            }
        }
    }
}

fn compare_versions(left: &[u32], right: &[u32]) -> Ordering {
    let len = left.len().max(right.len());
    (0..len)
        .map(|index| {
            let l = left.get(index).copied().unwrap_or(0);
            let r = right.get(index).copied().unwrap_or(0);
            l.cmp(&r)
        })
        .find(|ordering| *ordering != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn compare_frameworks(left: &TargetFramework, right: &TargetFramework) -> Ordering {
    match (left.sort_key(), right.sort_key()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some((lf, lv)), Some((rf, rv))) => lf.cmp(rf).then_with(|| compare_versions(lv, rv)),
    }
}

/// Files of one package that share a framework folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkGroup<T> {
    pub framework: TargetFramework,
    pub items: Vec<T>,
}

impl<T> FrameworkGroup<T> {
    pub fn new(framework: TargetFramework, items: Vec<T>) -> Self {
        Self { framework, items }
    }
}

/// Picks the group to install for `target`: the newest group compatible with
/// it, falling back to the framework-neutral group. Without a target the
/// neutral group wins, then the newest named group.
pub fn select_group<'a, T>(
    groups: &'a [FrameworkGroup<T>],
    target: Option<&TargetFramework>,
) -> Option<&'a FrameworkGroup<T>> {
    match target {
        Some(target) => groups
            .iter()
            .filter(|group| group.framework != TargetFramework::Any)
            .filter(|group| group.framework.is_compatible_with(target))
            .max_by(|a, b| compare_frameworks(&a.framework, &b.framework))
            .or_else(|| {
                groups
                    .iter()
                    .find(|group| group.framework == TargetFramework::Any)
            }),
        None => groups
            .iter()
            .find(|group| group.framework == TargetFramework::Any)
            .or_else(|| {
                groups
                    .iter()
                    .max_by(|a, b| compare_frameworks(&a.framework, &b.framework))
            }),
    }
}

/// The oldest named framework a package ships files for. Used as the target
/// for the whole install so every package is read against the same runtime.
pub fn lowest_supported<T>(groups: &[FrameworkGroup<T>]) -> Option<TargetFramework> {
    groups
        .iter()
        .map(|group| &group.framework)
        .filter(|framework| **framework != TargetFramework::Any)
        .min_by(|a, b| compare_frameworks(a, b))
        .cloned()
}
