use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Replaces `destination` with a copy of the package tree at `source`.
pub(crate) fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<()> {
    if !source.is_dir() {
        anyhow::bail!("package location is not a directory: {}", source.display());
    }
    if destination.exists() {
        fs::remove_dir_all(destination)
            .with_context(|| format!("failed clearing {}", destination.display()))?;
    }
    fs::create_dir_all(destination)
        .with_context(|| format!("failed creating {}", destination.display()))?;

    for relative in list_files_recursive(source)? {
        let target = destination.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        fs::copy(source.join(&relative), &target).with_context(|| {
            format!(
                "failed copying {} into {}",
                relative.display(),
                destination.display()
            )
        })?;
    }
    Ok(())
}

/// Every regular file below `root`, as paths relative to `root`, sorted.
pub(crate) fn list_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !root.is_dir() {
        return Ok(files);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let (children, subdirs) = read_children(&dir)?;
        files.extend(
            children
                .iter()
                .filter_map(|path| path.strip_prefix(root).ok())
                .map(Path::to_path_buf),
        );
        pending.extend(subdirs);
    }

    files.sort();
    Ok(files)
}

/// Immediate children of `dir`, split into (files, directories), each sorted.
pub(crate) fn read_children(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    if !dir.is_dir() {
        return Ok((files, dirs));
    }

    for entry in
        fs::read_dir(dir).with_context(|| format!("failed reading directory {}", dir.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }

    files.sort();
    dirs.sort();
    Ok((files, dirs))
}
