// artstage-core/src/pipeline/report.rs
use std::time::Duration;

use artstage_common::model::DownloadTask;

use crate::stage::DestinationReport;

/// What a pipeline run did, stage by stage.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub tasks: Vec<DownloadTask>,
    /// Platforms fetched over the network in this run.
    pub downloaded: Vec<String>,
    /// Platforms whose archive was already in the staging tree.
    pub reused: Vec<String>,
    pub extracted: Vec<String>,
    pub extraction_skipped: Vec<String>,
    pub destinations: Vec<DestinationReport>,
    pub duration: Duration,
}

impl PipelineReport {
    pub fn network_downloads(&self) -> usize {
        self.downloaded.len()
    }

    pub fn files_copied(&self) -> usize {
        self.destinations.iter().map(|d| d.copied).sum()
    }
}
