use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nodeagent_core::PackageFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// Another source was already written to the destination in this run.
    Overwritten,
    /// The same source was already written to the destination in this run.
    Skipped,
}

/// Copies package files and remembers what it wrote, so two packages
/// shipping the same destination are reported instead of silently racing.
#[derive(Debug, Default)]
pub struct FileCopier {
    written: HashMap<PathBuf, PathBuf>,
}

impl FileCopier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copy(&mut self, source: &Path, destination: &Path) -> Result<CopyOutcome> {
        let outcome = match self.written.get(destination) {
            Some(previous) if previous == source => return Ok(CopyOutcome::Skipped),
            Some(previous) => {
                tracing::warn!(
                    destination = %destination.display(),
                    previous = %previous.display(),
                    source = %source.display(),
                    "overwriting file written earlier in this install"
                );
                CopyOutcome::Overwritten
            }
            None => {
                if destination.exists() {
                    tracing::warn!(
                        destination = %destination.display(),
                        "overwriting existing file"
                    );
                }
                CopyOutcome::Copied
            }
        };

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(source, destination).with_context(|| {
            format!(
                "failed copying file from {} to {}",
                source.display(),
                destination.display()
            )
        })?;
        self.written
            .insert(destination.to_path_buf(), source.to_path_buf());
        Ok(outcome)
    }

    /// Copies every file to `target_dir` joined with its install path, in
    /// install-path order.
    pub fn copy_all(&mut self, files: &[PackageFile], target_dir: &Path) -> Result<()> {
        let mut files: Vec<&PackageFile> = files.iter().collect();
        files.sort_by(|a, b| a.install_path.cmp(&b.install_path));
        for file in files {
            self.copy(&file.source_path, &target_dir.join(&file.install_path))?;
        }
        Ok(())
    }

    pub fn written_count(&self) -> usize {
        self.written.len()
    }
}
