// artstage-core/src/locate.rs
use std::path::Path;

use artstage_common::config::Config;
use artstage_common::error::Result;
use artstage_common::model::{ArtifactDescriptor, DownloadTask};
use tracing::debug;

/// Plans one download per platform id, in descriptor order.
///
/// Pure: validates the descriptor and computes URLs and destinations without
/// touching the filesystem or the network.
pub fn locate(descriptor: &ArtifactDescriptor, staging_root: &Path) -> Result<Vec<DownloadTask>> {
    descriptor.validate()?;

    let tasks: Vec<DownloadTask> = descriptor
        .platform_ids
        .iter()
        .map(|id| {
            let url = descriptor.download_url(id);
            let destination = staging_root.join(ArtifactDescriptor::archive_file_name(id));
            debug!("Planned {} -> {}", url, destination.display());
            DownloadTask::new(id.as_str(), url, destination)
        })
        .collect();
    Ok(tasks)
}

/// Like [`locate`], using the configured staging root and attaching any
/// configured checksums.
pub fn locate_with_config(config: &Config) -> Result<Vec<DownloadTask>> {
    let mut tasks = locate(&config.artifact, config.staging_root())?;
    for task in &mut tasks {
        task.sha256 = config.checksum_for(&task.platform_id).map(str::to_string);
    }
    Ok(tasks)
}
