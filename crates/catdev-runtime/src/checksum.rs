//! SHA-512 digest computation and verification for downloaded artifacts
//!
//! Apache mirrors publish a `.sha512` sibling next to every release archive.
//! The document is a single line whose first whitespace-delimited token is the
//! hex digest.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha512};

use catdev_core::prelude::*;

/// Compute the SHA-512 digest of a file as a lowercase hex string.
///
/// Streams the file through an 8 KiB buffer, so arbitrarily large archives
/// are fine.
pub fn file_sha512(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha512::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Extract the digest token from a checksum document.
///
/// The first whitespace-delimited token is the digest; anything after it
/// (usually the file name) is ignored. Returns lowercase hex.
pub fn parse_digest_document(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .map(|token| token.to_ascii_lowercase())
}

/// Fetch the expected digest for an artifact from its checksum URL.
pub async fn fetch_expected_digest(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::download(url, e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::download(url, e.to_string()))?;

    let body = response
        .text()
        .await
        .map_err(|e| Error::download(url, e.to_string()))?;

    parse_digest_document(&body).ok_or_else(|| Error::download(url, "empty checksum document"))
}

/// Verify a local file against a remote checksum document.
///
/// Returns `Ok(true)` on match, `Ok(false)` on mismatch. Fails with an I/O
/// error if the file cannot be read or a download error if the checksum URL
/// cannot be fetched. No side effects beyond the network read.
pub async fn verify(client: &reqwest::Client, file: &Path, digest_url: &str) -> Result<bool> {
    let actual = file_sha512(file)?;
    let expected = fetch_expected_digest(client, digest_url).await?;
    let matches = expected.eq_ignore_ascii_case(&actual);
    if !matches {
        warn!(
            "Checksum mismatch for {}: expected {}, got {}",
            file.display(),
            expected,
            actual
        );
    }
    Ok(matches)
}
