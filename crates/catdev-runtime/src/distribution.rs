//! Tomcat distribution acquisition
//!
//! Cache-first strategy: a previously extracted distribution is reused
//! outright; otherwise the release archive is downloaded from the primary
//! mirror, verified against its published SHA-512, extracted into the cache,
//! and the archive mirror is used as a one-shot fallback.
//!
//! Cache layout: `<cacheRoot>/<version>/apache-tomcat-<version>.zip` next to
//! the extracted `apache-tomcat-<version>/` tree. A `bin/` directory plus
//! `lib/catalina.jar` is the sole validity signal.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use catdev_core::prelude::*;

use crate::checksum;

/// Connect timeout for mirror requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall transfer timeout for a single download
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Version prefixes that are end-of-life and refused outright
const EXCLUDED_PREFIXES: &[&str] = &["7.", "8."];

/// A supported Tomcat release line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseFamily {
    /// Major line, e.g. 9 for 9.0.x
    pub major: u8,
    /// Minimum Java feature release required by this line
    pub min_java: u8,
    /// Primary CDN mirror base
    pub primary_mirror: &'static str,
    /// Long-term archive mirror base
    pub archive_mirror: &'static str,
}

const TOMCAT_9: ReleaseFamily = ReleaseFamily {
    major: 9,
    min_java: 8,
    primary_mirror: "https://dlcdn.apache.org/tomcat/tomcat-9",
    archive_mirror: "https://archive.apache.org/dist/tomcat/tomcat-9",
};

const TOMCAT_10: ReleaseFamily = ReleaseFamily {
    major: 10,
    min_java: 11,
    primary_mirror: "https://dlcdn.apache.org/tomcat/tomcat-10",
    archive_mirror: "https://archive.apache.org/dist/tomcat/tomcat-10",
};

const TOMCAT_11: ReleaseFamily = ReleaseFamily {
    major: 11,
    min_java: 17,
    primary_mirror: "https://dlcdn.apache.org/tomcat/tomcat-11",
    archive_mirror: "https://archive.apache.org/dist/tomcat/tomcat-11",
};

impl ReleaseFamily {
    /// Resolve a version string to its release line.
    ///
    /// Unknown and explicitly excluded (EOL) version prefixes fail before
    /// any I/O happens.
    pub fn for_version(version: &str) -> Result<Self> {
        if EXCLUDED_PREFIXES.iter().any(|p| version.starts_with(p)) {
            return Err(Error::unsupported_version(version));
        }
        if version.starts_with("9.") {
            Ok(TOMCAT_9)
        } else if version.starts_with("10.") {
            Ok(TOMCAT_10)
        } else if version.starts_with("11.") {
            Ok(TOMCAT_11)
        } else {
            Err(Error::unsupported_version(version))
        }
    }

    /// Archive file name for a version (`apache-tomcat-<version>.zip`)
    pub fn archive_name(version: &str) -> String {
        format!("apache-tomcat-{version}.zip")
    }

    /// Extracted directory name for a version
    pub fn extracted_name(version: &str) -> String {
        format!("apache-tomcat-{version}")
    }

    /// Download URL on the primary mirror
    pub fn primary_url(&self, version: &str) -> String {
        format!(
            "{}/v{version}/bin/{}",
            self.primary_mirror,
            Self::archive_name(version)
        )
    }

    /// Download URL on the archive mirror
    pub fn archive_url(&self, version: &str) -> String {
        format!(
            "{}/v{version}/bin/{}",
            self.archive_mirror,
            Self::archive_name(version)
        )
    }
}

/// A versioned, extracted distribution on disk.
#[derive(Debug, Clone)]
pub struct CachedDistribution {
    pub version: String,
    pub path: PathBuf,
}

impl CachedDistribution {
    /// Structural validity check: launcher directory and core library present
    pub fn is_valid(&self) -> bool {
        self.path.join("bin").is_dir() && self.path.join("lib").join("catalina.jar").is_file()
    }
}

/// Outcome of verifying a cached or downloaded archive.
enum VerifyOutcome {
    Verified,
    /// Checksum service unreachable; the archive is accepted unverified
    Waived,
    Mismatch {
        expected: String,
        actual: String,
    },
}

/// Resolves a cached or freshly downloaded, verified, extracted distribution.
pub struct DistributionAcquirer {
    cache_root: PathBuf,
    client: reqwest::Client,
}

impl DistributionAcquirer {
    pub fn new(cache_root: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TRANSFER_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            cache_root: cache_root.into(),
            client,
        })
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.cache_root.join(version)
    }

    /// Where the extracted distribution for a version lives
    pub fn distribution_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version)
            .join(ReleaseFamily::extracted_name(version))
    }

    /// Produce a validated, extracted distribution for the requested version.
    ///
    /// A valid previously extracted directory short-circuits without any
    /// network access.
    pub async fn acquire(&self, version: &str) -> Result<CachedDistribution> {
        let family = ReleaseFamily::for_version(version)?;

        let dist = CachedDistribution {
            version: version.to_string(),
            path: self.distribution_dir(version),
        };
        if dist.is_valid() {
            debug!("Using cached distribution at {}", dist.path.display());
            return Ok(dist);
        }

        let version_dir = self.version_dir(version);
        std::fs::create_dir_all(&version_dir)?;

        let archive = version_dir.join(ReleaseFamily::archive_name(version));
        self.ensure_verified_archive(&family, version, &archive)
            .await?;

        info!(
            "Extracting {} into {}",
            archive.display(),
            version_dir.display()
        );
        extract_archive(&archive, &version_dir)?;
        mark_scripts_executable(&dist.path.join("bin"))?;

        if !dist.is_valid() {
            return Err(Error::extraction(format!(
                "archive did not produce expected directory {}",
                dist.path.display()
            )));
        }
        info!("Distribution {} ready at {}", version, dist.path.display());
        Ok(dist)
    }

    /// List versions with a valid extracted distribution in the cache.
    pub fn cached_versions(&self) -> Vec<CachedDistribution> {
        let Ok(entries) = std::fs::read_dir(&self.cache_root) else {
            return Vec::new();
        };
        let mut found: Vec<CachedDistribution> = entries
            .flatten()
            .filter_map(|entry| {
                let version = entry.file_name().to_str()?.to_string();
                let dist = CachedDistribution {
                    path: self.distribution_dir(&version),
                    version,
                };
                dist.is_valid().then_some(dist)
            })
            .collect();
        found.sort_by(|a, b| a.version.cmp(&b.version));
        found
    }

    /// Make sure a checksum-verified archive sits at `archive`.
    ///
    /// Order: cached archive, primary mirror, archive mirror. Each candidate
    /// is verified against the corresponding mirror's digest document; a
    /// mismatch moves on to the next candidate and the last mismatch is
    /// fatal. An unreachable checksum service waives verification.
    async fn ensure_verified_archive(
        &self,
        family: &ReleaseFamily,
        version: &str,
        archive: &Path,
    ) -> Result<()> {
        let primary_url = family.primary_url(version);
        let primary_digest = format!("{primary_url}.sha512");

        if archive.is_file() {
            match self.check_archive(archive, &primary_digest).await? {
                VerifyOutcome::Verified | VerifyOutcome::Waived => return Ok(()),
                VerifyOutcome::Mismatch { .. } => {
                    warn!(
                        "Cached archive {} failed verification, re-downloading",
                        archive.display()
                    );
                    std::fs::remove_file(archive)?;
                }
            }
        }

        match self.download(&primary_url, archive).await {
            Ok(()) => match self.check_archive(archive, &primary_digest).await? {
                VerifyOutcome::Verified | VerifyOutcome::Waived => return Ok(()),
                VerifyOutcome::Mismatch { .. } => {
                    warn!("Download from primary mirror failed verification");
                }
            },
            Err(e) => {
                warn!("Primary mirror download failed: {e}");
            }
        }

        // One-shot fallback; never looped.
        let archive_url = family.archive_url(version);
        let archive_digest = format!("{archive_url}.sha512");
        self.download(&archive_url, archive).await?;
        match self.check_archive(archive, &archive_digest).await? {
            VerifyOutcome::Verified | VerifyOutcome::Waived => Ok(()),
            VerifyOutcome::Mismatch { expected, actual } => Err(Error::checksum_mismatch(
                archive.display().to_string(),
                expected,
                actual,
            )),
        }
    }

    /// Verify one archive candidate. Digest-service unavailability is waived
    /// (availability over integrity -- deliberate, see DESIGN.md); a digest
    /// that disagrees is reported as a mismatch.
    async fn check_archive(&self, archive: &Path, digest_url: &str) -> Result<VerifyOutcome> {
        let actual = checksum::file_sha512(archive)?;
        match checksum::fetch_expected_digest(&self.client, digest_url).await {
            Ok(expected) => {
                if expected.eq_ignore_ascii_case(&actual) {
                    Ok(VerifyOutcome::Verified)
                } else {
                    Ok(VerifyOutcome::Mismatch { expected, actual })
                }
            }
            Err(e) => {
                warn!("Checksum service unreachable ({e}); accepting archive unverified");
                Ok(VerifyOutcome::Waived)
            }
        }
    }

    /// Download a URL to a file. Non-2xx responses are failures; a partial
    /// file is discarded on any error.
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::download(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::download(url, format!("HTTP {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::download(url, e.to_string()))?;

        if let Err(e) = std::fs::write(dest, &bytes) {
            let _ = std::fs::remove_file(dest);
            return Err(e.into());
        }
        debug!("Downloaded {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }
}

/// Extract a zip archive into `dest`, refusing any entry whose normalized
/// path would escape it.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| Error::extraction(format!("{}: {e}", archive.display())))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| Error::extraction(format!("{}: {e}", archive.display())))?;

        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::unsafe_archive_entry(entry.name()));
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Mark launcher shell scripts executable. No-op on platforms without a
/// permission bit, and when the directory is absent.
#[cfg(unix)]
fn mark_scripts_executable(bin_dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let Ok(entries) = std::fs::read_dir(bin_dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sh") {
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_scripts_executable(_bin_dir: &Path) -> Result<()> {
    Ok(())
}
