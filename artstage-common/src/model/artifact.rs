// artstage-common/src/model/artifact.rs
use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ArtError, Result};

/// A versioned artifact published as one zip archive per platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub version: String,
    pub platform_ids: Vec<String>,
    pub base_url: String,
}

impl ArtifactDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        platform_ids: Vec<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform_ids,
            base_url: base_url.into(),
        }
    }

    /// Checks the descriptor invariants: an absolute http(s) base URL, a
    /// non-empty version, at least one platform, and platform ids that are
    /// unique, single path components (they become file and directory names).
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;
        if self.version.trim().is_empty() {
            return Err(ArtError::Config(format!(
                "artifact '{}' has an empty version",
                self.name
            )));
        }
        if self.platform_ids.is_empty() {
            return Err(ArtError::Config(format!(
                "artifact '{}' lists no platform ids",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for id in &self.platform_ids {
            if !is_safe_platform_id(id) {
                return Err(ArtError::Config(format!(
                    "platform id '{id}' is not a valid directory name"
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(ArtError::Config(format!(
                    "platform id '{id}' is listed more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(ArtError::Config(format!(
                "artifact '{}' has an empty base URL",
                self.name
            )));
        }
        let url = Url::parse(self.base_url.trim()).map_err(|e| {
            ArtError::Config(format!(
                "artifact '{}' has an invalid base URL '{}': {e}",
                self.name, self.base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ArtError::Config(format!(
                "artifact '{}' base URL '{}' is not an http(s) URL",
                self.name, self.base_url
            )));
        }
        Ok(url)
    }

    pub fn archive_file_name(platform_id: &str) -> String {
        format!("{platform_id}.zip")
    }

    pub fn download_url(&self, platform_id: &str) -> String {
        format!(
            "{}/releases/download/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.version,
            Self::archive_file_name(platform_id)
        )
    }
}

fn is_safe_platform_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', ':'])
        && !id.chars().any(char::is_control)
}

#[derive(Debug, Clone)]
pub enum DownloadStatus {
    Pending,
    Downloaded { size_bytes: u64, reused: bool },
    Failed(ArtError),
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub platform_id: String,
    pub url: String,
    pub destination_path: PathBuf,
    pub sha256: Option<String>,
    pub status: DownloadStatus,
}

impl DownloadTask {
    pub fn new(
        platform_id: impl Into<String>,
        url: impl Into<String>,
        destination_path: PathBuf,
    ) -> Self {
        Self {
            platform_id: platform_id.into(),
            url: url.into(),
            destination_path,
            sha256: None,
            status: DownloadStatus::Pending,
        }
    }

    pub fn is_downloaded(&self) -> bool {
        matches!(self.status, DownloadStatus::Downloaded { .. })
    }

    pub fn was_reused(&self) -> bool {
        matches!(self.status, DownloadStatus::Downloaded { reused: true, .. })
    }

    pub fn error(&self) -> Option<&ArtError> {
        match &self.status {
            DownloadStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}
