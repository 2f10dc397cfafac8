//! Exploded-directory deployment into an instance's `webapps/` root
//!
//! Deployment is a full recursive copy under the computed target directory
//! name, replacing any prior deployment at that path. `sync_change` is the
//! incremental single-file fast path used by the change watcher.

use std::path::{Path, PathBuf};

use catdev_core::prelude::*;
use catdev_core::DeploymentConfig;

use crate::fsutil::{copy_tree, remove_tree_best_effort};

/// Copies and removes an application tree inside a runtime instance.
pub struct DeploymentEngine {
    config: DeploymentConfig,
}

impl DeploymentEngine {
    pub fn new(config: DeploymentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Deploy the source tree, replacing any prior deployment at the target.
    ///
    /// A missing source directory is a hard failure; failures deleting
    /// individual stale entries are logged and skipped.
    pub fn deploy(&self) -> Result<PathBuf> {
        if !self.config.source_dir.is_dir() {
            return Err(Error::missing_source(&self.config.source_dir));
        }

        let target = self.config.target_dir();
        if target.exists() {
            debug!("Removing previous deployment at {}", target.display());
            remove_tree_best_effort(&target);
        }
        std::fs::create_dir_all(&self.config.webapps_dir)?;
        copy_tree(&self.config.source_dir, &target)?;

        info!(
            "Deployed module {} to {}",
            self.config.module,
            target.display()
        );
        Ok(target)
    }

    /// Explicit delete-if-present followed by deploy, for callers that want
    /// guaranteed clean-replace semantics.
    pub fn redeploy(&self) -> Result<PathBuf> {
        let target = self.config.target_dir();
        if target.exists() {
            remove_tree_best_effort(&target);
        }
        self.deploy()
    }

    /// Copy one changed file into its corresponding location under the
    /// deployed target, creating intermediate directories as needed.
    pub fn sync_change(&self, changed: &Path) -> Result<()> {
        let relative = changed
            .strip_prefix(&self.config.source_dir)
            .map_err(|_| {
                Error::config(format!(
                    "changed path {} is outside source tree {}",
                    changed.display(),
                    self.config.source_dir.display()
                ))
            })?;

        let dest = self.config.target_dir().join(relative);
        if changed.is_dir() {
            std::fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(changed, &dest)?;
            debug!("Synced {} -> {}", changed.display(), dest.display());
        }
        Ok(())
    }
}
