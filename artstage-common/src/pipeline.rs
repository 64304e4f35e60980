// artstage-common/src/pipeline.rs
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{ArtError, Result};

/// The working stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineStage {
    Locating,
    Downloading,
    Extracting,
    Staging,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::Locating,
        PipelineStage::Downloading,
        PipelineStage::Extracting,
        PipelineStage::Staging,
    ];

    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Locating => Some(PipelineStage::Downloading),
            PipelineStage::Downloading => Some(PipelineStage::Extracting),
            PipelineStage::Extracting => Some(PipelineStage::Staging),
            PipelineStage::Staging => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Locating => "locate",
            PipelineStage::Downloading => "download",
            PipelineStage::Extracting => "extract",
            PipelineStage::Staging => "stage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running(PipelineStage),
    Done,
    Failed { stage: PipelineStage },
}

impl PipelineState {
    /// Checks `self -> to` against the state machine
    /// `Idle -> Locating -> Downloading -> Extracting -> Staging -> Done`,
    /// with `Failed` reachable from any non-terminal state. Runs stopped early
    /// may finish straight from the stage they stopped at.
    pub fn transition(self, to: PipelineState) -> Result<PipelineState> {
        let allowed = match (self, to) {
            (PipelineState::Idle, PipelineState::Running(PipelineStage::Locating)) => true,
            (PipelineState::Running(current), PipelineState::Running(next)) => {
                current.next() == Some(next)
            }
            (PipelineState::Running(_), PipelineState::Done) => true,
            (PipelineState::Idle, PipelineState::Failed { .. }) => true,
            (PipelineState::Running(current), PipelineState::Failed { stage }) => current == stage,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(ArtError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running(stage) => write!(f, "{stage}"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { stage } => write!(f, "failed ({stage})"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum PipelineEvent {
    PipelineStarted {
        artifact: String,
        version: String,
        platform_count: usize,
    },
    StageStarted {
        stage: PipelineStage,
    },
    StageFinished {
        stage: PipelineStage,
    },
    /// A request is about to be sent; reused archives only get `DownloadSkipped`.
    DownloadStarted {
        platform_id: String,
        url: String,
    },
    DownloadSkipped {
        platform_id: String,
        path: PathBuf,
    },
    DownloadFinished {
        platform_id: String,
        path: PathBuf,
        size_bytes: u64,
    },
    DownloadFailed {
        platform_id: String,
        url: String,
        error: String,
    },
    ExtractStarted {
        platform_id: String,
    },
    ExtractSkipped {
        platform_id: String,
    },
    ExtractFinished {
        platform_id: String,
        files: usize,
    },
    DestinationStaged {
        path: PathBuf,
        copied: usize,
        unchanged: usize,
    },
    DestinationFailed {
        path: PathBuf,
        error: String,
    },
    PipelineFinished {
        duration_secs: f64,
    },
    PipelineFailed {
        stage: PipelineStage,
        error: String,
    },
}

impl PipelineEvent {
    pub fn download_failed(platform_id: String, url: String, error: &ArtError) -> Self {
        PipelineEvent::DownloadFailed {
            platform_id,
            url,
            error: error.to_string(),
        }
    }
}
