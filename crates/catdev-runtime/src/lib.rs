//! # catdev-runtime - Dev-Instance Lifecycle
//!
//! Implements the full local-instance workflow on top of `catdev-core`:
//!
//! - [`distribution`] - cache-first acquisition of release archives, with
//!   SHA-512 verification ([`checksum`]) and traversal-safe extraction
//! - [`instance`] - isolated instance generation with listener rewriting
//! - [`deploy`] - exploded-tree deployment into an instance's `webapps/`
//! - [`watcher`] - change watching with an inactivity-debounced redeploy
//! - [`process`] - run/start/stop supervision through the launch script
//!
//! A typical session: acquire a distribution, generate an instance for it,
//! deploy the application, start the server, and let the watcher keep the
//! deployment in sync.

pub mod checksum;
pub mod deploy;
pub mod distribution;
mod fsutil;
pub mod instance;
pub mod process;
pub mod watcher;

pub use deploy::DeploymentEngine;
pub use distribution::{CachedDistribution, DistributionAcquirer, ReleaseFamily};
pub use instance::{is_valid_instance, InstanceGenerator};
pub use process::{build_environment, ProcessController, ProcessState};
pub use watcher::{ChangeWatcher, WatchState};
