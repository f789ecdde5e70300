//! Filesystem utilities.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Whether a directory exists and contains no entries.
pub fn dir_is_empty(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

/// Commit a fully-staged directory to its final location by rename.
///
/// `dst` must not exist, or must be an empty directory (which is replaced).
/// The rename is atomic on the same filesystem, so readers of `dst` never
/// observe a half-written tree.
pub fn commit_staged_dir(staged: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_dir(dst)
            .with_context(|| format!("failed to replace directory: {}", dst.display()))?;
    }
    fs::rename(staged, dst).with_context(|| {
        format!(
            "failed to move staged directory {} to {}",
            staged.display(),
            dst.display()
        )
    })?;
    Ok(())
}
