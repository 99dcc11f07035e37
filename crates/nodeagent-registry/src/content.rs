use std::path::{Path, PathBuf};

use anyhow::Result;
use nodeagent_core::PackageFile;
use nodeagent_resolver::{select_group, FrameworkGroup, TargetFramework};

use crate::fs_ops::{list_files_recursive, read_children};

pub(crate) const LIB_FOLDER: &str = "lib";
pub(crate) const CONTENT_FOLDER: &str = "content";

/// Groups the files under `<package>/<folder>/` by framework folder.
///
/// Files directly in the folder form the framework-neutral group. Sub-folders
/// whose names do not read as a framework are not installed.
pub(crate) fn framework_groups(
    package_root: &Path,
    folder: &str,
) -> Result<Vec<FrameworkGroup<PackageFile>>> {
    let root = package_root.join(folder);
    let (files, dirs) = read_children(&root)?;
    let mut groups = Vec::new();

    if !files.is_empty() {
        let items = files
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_owned();
                Some(PackageFile::new(path, name))
            })
            .collect();
        groups.push(FrameworkGroup::new(TargetFramework::Any, items));
    }

    for dir in dirs {
        let Some(framework) = dir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(TargetFramework::parse)
        else {
            tracing::debug!(folder = %dir.display(), "skipping folder that names no framework");
            continue;
        };
        let items = list_files_recursive(&dir)?
            .into_iter()
            .map(|relative| PackageFile::new(dir.join(&relative), relative))
            .collect::<Vec<_>>();
        if !items.is_empty() {
            groups.push(FrameworkGroup::new(framework, items));
        }
    }

    Ok(groups)
}

/// The lib files of one package for `target`, relative to the lib target
/// directory of the installation.
pub(crate) fn select_lib_files(
    package_root: &Path,
    target: Option<&TargetFramework>,
) -> Result<Vec<PackageFile>> {
    let groups = framework_groups(package_root, LIB_FOLDER)?;
    Ok(select_group(&groups, target)
        .map(|group| group.items.clone())
        .unwrap_or_default())
}

/// The content files of one package for `target`, prefixed with
/// `content/<package_id>/`.
pub(crate) fn select_content_files(
    package_root: &Path,
    package_id: &str,
    target: Option<&TargetFramework>,
) -> Result<Vec<PackageFile>> {
    let groups = framework_groups(package_root, CONTENT_FOLDER)?;
    let prefix = PathBuf::from(CONTENT_FOLDER).join(package_id);
    Ok(select_group(&groups, target)
        .map(|group| {
            group
                .items
                .iter()
                .map(|file| PackageFile::new(&file.source_path, prefix.join(&file.install_path)))
                .collect()
        })
        .unwrap_or_default())
}
