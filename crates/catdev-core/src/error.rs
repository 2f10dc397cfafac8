//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unsupported Tomcat version: {version}")]
    UnsupportedVersion { version: String },

    // ─────────────────────────────────────────────────────────────
    // Distribution Acquisition Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Checksum mismatch for {resource}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("Archive entry escapes extraction directory: {entry}")]
    UnsafeArchiveEntry { entry: String },

    #[error("Extraction failed: {message}")]
    Extraction { message: String },

    #[error("Not a valid Tomcat distribution: {path}")]
    DistributionInvalid { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Instance/Deployment Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Instance generation error: {message}")]
    Instance { message: String },

    #[error("Deployment source directory not found: {path}")]
    MissingSource { path: PathBuf },

    #[error("File watch error: {message}")]
    Watch { message: String },

    // ─────────────────────────────────────────────────────────────
    // Process Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Launch script not found: {path}")]
    MissingScript { path: PathBuf },

    #[error("Failed to spawn Tomcat process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Tomcat did not accept connections on {host}:{port} within {timeout_secs}s")]
    StartupTimeout {
        host: String,
        port: u16,
        timeout_secs: u64,
    },

    #[error("Tomcat did not stop within {timeout_secs}s")]
    ShutdownTimeout { timeout_secs: u64 },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unsupported_version(version: impl Into<String>) -> Self {
        Self::UnsupportedVersion {
            version: version.into(),
        }
    }

    pub fn download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn checksum_mismatch(
        resource: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            resource: resource.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn unsafe_archive_entry(entry: impl Into<String>) -> Self {
        Self::UnsafeArchiveEntry {
            entry: entry.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    pub fn distribution_invalid(path: impl Into<PathBuf>) -> Self {
        Self::DistributionInvalid { path: path.into() }
    }

    pub fn instance(message: impl Into<String>) -> Self {
        Self::Instance {
            message: message.into(),
        }
    }

    pub fn missing_source(path: impl Into<PathBuf>) -> Self {
        Self::MissingSource { path: path.into() }
    }

    pub fn watch(message: impl Into<String>) -> Self {
        Self::Watch {
            message: message.into(),
        }
    }

    pub fn missing_script(path: impl Into<PathBuf>) -> Self {
        Self::MissingScript { path: path.into() }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    /// Check if this error indicates corrupted or tampered content.
    ///
    /// Integrity errors abort acquisition outright and are never retried.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::UnsafeArchiveEntry { .. }
        )
    }

    /// Check if this error should fail fast without any fallback attempt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::UnsupportedVersion { .. }
                | Error::MissingScript { .. }
                | Error::MissingSource { .. }
                | Error::ProcessSpawn { .. }
        ) || self.is_integrity()
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
