// artstage-net/src/http.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use artstage_common::error::{ArtError, Result};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::validation::{validate_url, verify_checksum, verify_zip_signature};

const USER_AGENT_STRING: &str = "artstage (Rust; artifact fetch-and-stage)";

/// What the caller knows about one archive it wants on disk.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRequest<'a> {
    pub label: &'a str,
    pub url: &'a str,
    pub destination: &'a Path,
    pub sha256: Option<&'a str>,
    pub allow_http: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchedArchive {
    pub size_bytes: u64,
    /// True when an existing file satisfied the request and no request was sent.
    pub reused: bool,
}

pub fn build_http_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| ArtError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// Returns the archive already at the request's destination when it can be
/// used as is, without touching the network.
///
/// An existing non-empty file is reused unless it was fetched from a different
/// URL (a version or host change) or a checksum is configured and the file does
/// not match it. In both cases the file is discarded so the caller downloads
/// it again.
pub fn reuse_existing(request: &ArchiveRequest<'_>) -> Result<Option<FetchedArchive>> {
    let destination = request.destination;
    if destination.is_file() && !recorded_source_matches(destination, request.url) {
        warn!(
            "Archive {} was fetched from a different URL than {}, downloading again",
            destination.display(),
            request.url
        );
        fs::remove_file(destination).map_err(|e| ArtError::io_at(destination, e))?;
        return Ok(None);
    }

    Ok(reusable_size(destination, request.sha256)?.map(|size_bytes| {
        debug!("Using existing archive: {}", destination.display());
        FetchedArchive {
            size_bytes,
            reused: true,
        }
    }))
}

/// Downloads the archive described by `request`, replacing whatever is at its
/// destination once the new file has been verified.
pub async fn download_archive(
    client: &Client,
    request: ArchiveRequest<'_>,
) -> Result<FetchedArchive> {
    let destination = request.destination;
    debug!(
        "Preparing to fetch '{}' from {} into {}",
        request.label,
        request.url,
        destination.display()
    );
    validate_url(request.url, request.allow_http)?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| ArtError::io_at(parent, e))?;
    }

    let record = source_record_path(destination);
    match fs::remove_file(&record) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ArtError::io_at(&record, e)),
    }

    let size_bytes = download_and_verify(client, &request).await?;
    fs::write(&record, format!("{}\n", request.url)).map_err(|e| ArtError::io_at(&record, e))?;
    Ok(FetchedArchive {
        size_bytes,
        reused: false,
    })
}

/// `.{file}.source` next to the archive, holding the URL it came from.
fn source_record_path(archive: &Path) -> PathBuf {
    archive.with_file_name(format!(
        ".{}.source",
        archive.file_name().unwrap_or_default().to_string_lossy()
    ))
}

/// An archive without a record (placed by hand, or by an older run) is
/// trusted.
fn recorded_source_matches(archive: &Path, url: &str) -> bool {
    match fs::read_to_string(source_record_path(archive)) {
        Ok(recorded) => recorded.trim() == url,
        Err(_) => true,
    }
}

fn reusable_size(path: &Path, sha256_expected: Option<&str>) -> Result<Option<u64>> {
    let metadata = match fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        Ok(_) => {
            return Err(ArtError::Validation(format!(
                "download destination {} exists and is not a file",
                path.display()
            )))
        }
        Err(_) => {
            debug!("File not found: {}", path.display());
            return Ok(None);
        }
    };

    if metadata.len() == 0 {
        debug!("Existing file {} is empty, downloading again", path.display());
        return Ok(None);
    }

    if let Some(expected) = sha256_expected {
        if let Err(e) = verify_checksum(path, expected) {
            debug!(
                "Existing file checksum mismatch ({}): {}. Redownloading.",
                path.display(),
                e
            );
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(
                    "Failed to remove stale file {}: {}",
                    path.display(),
                    remove_err
                );
            }
            return Ok(None);
        }
    }
    Ok(Some(metadata.len()))
}

async fn download_and_verify(client: &Client, request: &ArchiveRequest<'_>) -> Result<u64> {
    let final_path = request.destination;
    let url = request.url;
    let temp_filename = format!(
        ".{}.download",
        final_path.file_name().unwrap_or_default().to_string_lossy()
    );
    let temp_path = final_path.with_file_name(temp_filename);
    debug!("Downloading to temporary path: {}", temp_path.display());

    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url}: {e}");
        ArtError::Network(request.label.to_string(), url.to_string(), e.to_string())
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        error!("HTTP error {} for URL {}", status, url);
        return Err(ArtError::Network(
            request.label.to_string(),
            url.to_string(),
            format!("server responded with {status}"),
        ));
    }

    let mut temp_file = TokioFile::create(&temp_path)
        .await
        .map_err(|e| ArtError::io_at(&temp_path, e))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(temp_file);
                discard(&temp_path);
                return Err(ArtError::Network(
                    request.label.to_string(),
                    url.to_string(),
                    format!("failed while reading response body: {e}"),
                ));
            }
        };
        if let Err(e) = temp_file.write_all(&chunk).await {
            drop(temp_file);
            discard(&temp_path);
            return Err(ArtError::io_at(&temp_path, e));
        }
        written += chunk.len() as u64;
    }
    temp_file
        .flush()
        .await
        .map_err(|e| ArtError::io_at(&temp_path, e))?;
    drop(temp_file);
    debug!("Finished writing {} bytes to temp file.", written);

    let verified = verify_zip_signature(&temp_path).and_then(|_| match request.sha256 {
        Some(expected) => verify_checksum(&temp_path, expected),
        None => Ok(()),
    });
    if let Err(e) = verified {
        discard(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, final_path).map_err(|e| ArtError::io_at(final_path, e))?;
    debug!("Moved verified file to final location: {}", final_path.display());
    Ok(written)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Could not remove temporary file {}: {}", path.display(), e);
    }
}
