//! Shared filesystem helpers for instance generation and deployment

use std::path::Path;

use catdev_core::prelude::*;

/// Recursively copy a directory tree. Directories are created as needed and
/// existing files are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let source = entry.path();
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            std::fs::copy(&source, &target)?;
        }
    }
    Ok(())
}

/// Recursively delete a tree, best-effort per entry.
///
/// Individual failures are logged and skipped; stale leftover files are
/// preferable to aborting the owning deployment.
pub fn remove_tree_best_effort(path: &Path) {
    let Ok(entries) = std::fs::read_dir(path) else {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to delete {}: {e}", path.display());
        }
        return;
    };
    for entry in entries.flatten() {
        let child = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            remove_tree_best_effort(&child);
        } else if let Err(e) = std::fs::remove_file(&child) {
            warn!("Failed to delete {}: {e}", child.display());
        }
    }
    if let Err(e) = std::fs::remove_dir(path) {
        warn!("Failed to remove directory {}: {e}", path.display());
    }
}
