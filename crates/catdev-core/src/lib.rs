//! # catdev-core - Core Domain Types
//!
//! Foundation crate for catdev. Provides the immutable configuration
//! records, error handling, and logging bootstrap shared by the runtime
//! components.
//!
//! This crate has **zero internal dependencies** -- it only depends on
//! external crates (serde, thiserror, tracing, dirs).
//!
//! ## Public API
//!
//! ### Configuration (`config`)
//! - [`ServerConfig`] - runtime location, listener settings, environment, timeouts
//! - [`DeploymentConfig`] - source tree, context path, target root, watch policy
//! - [`normalize_context()`] - context-identifier normalization
//!
//! ### Error Handling (`error`)
//! - [`Error`] - custom error enum with fatal vs best-effort classification
//! - [`Result`] - type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use catdev_core::prelude::*;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;

// Re-export commonly used types at crate root for convenience
pub use config::{
    instance_dir_name, launch_script_name, normalize_context, DeploymentConfig, ServerConfig,
    CONTEXT_SEPARATOR, DEFAULT_HOST, DEFAULT_INACTIVITY_SECS, DEFAULT_PORT,
    DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_STARTUP_TIMEOUT,
};
pub use error::{Error, Result, ResultExt};
