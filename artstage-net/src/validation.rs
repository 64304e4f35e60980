// artstage-net/src/validation.rs
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use artstage_common::error::{ArtError, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Hex-encoded SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| ArtError::io_at(path, e))?;
    let mut hasher = Sha256::new();
    let bytes_copied = io::copy(&mut file, &mut hasher).map_err(|e| ArtError::io_at(path, e))?;
    let actual = hex::encode(hasher.finalize());
    tracing::debug!(
        "Calculated SHA256 of {}: {} ({} bytes read)",
        path.display(),
        actual,
        bytes_copied
    );
    Ok(actual)
}

pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    tracing::debug!("Verifying checksum for: {}", path.display());
    let actual = sha256_file(path)?;
    tracing::debug!("Expected SHA256:   {}", expected);
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(ArtError::ChecksumMismatch(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )))
    }
}

/// Checks the leading bytes of a file for a zip signature, so an HTML error
/// page served with a 200 status is not kept as an archive.
pub fn verify_zip_signature(path: &Path) -> Result<()> {
    let mut head = [0u8; 8];
    let mut file = File::open(path).map_err(|e| ArtError::io_at(path, e))?;
    let read = read_prefix(&mut file, &mut head).map_err(|e| ArtError::io_at(path, e))?;
    if infer::archive::is_zip(&head[..read]) {
        tracing::debug!("Content type verified as zip: {}", path.display());
        Ok(())
    } else {
        Err(ArtError::CorruptArchive(format!(
            "{} is not a zip archive",
            path.display()
        )))
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Validates a download URL. Only `https` is accepted unless `allow_http` is
/// set, which local mirrors and test servers need.
pub fn validate_url(url_str: &str, allow_http: bool) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| ArtError::Validation(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if allow_http => Ok(url),
        scheme => Err(ArtError::Validation(format!(
            "Invalid URL scheme for '{url_str}': must be https, but got '{scheme}'"
        ))),
    }
}
