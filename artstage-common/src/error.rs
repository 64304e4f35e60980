use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::pipeline::PipelineStage;

#[derive(Error, Debug, Clone)]
pub enum ArtError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("I/O Error at {}: {}", .0.display(), .1)]
    IoPath(PathBuf, Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Network Error: failed to download '{0}' from '{1}': {2}")]
    Network(String, String, String),

    #[error("Corrupt Archive: {0}")]
    CorruptArchive(String),

    #[error("Unsafe Archive Entry: {0}")]
    ArchiveSafety(String),

    #[error("Checksum Mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{stage} failed for {artifact}: {source}")]
    StageFailed {
        stage: PipelineStage,
        artifact: String,
        source: Box<ArtError>,
    },

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl ArtError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io_at(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ArtError::IoPath(path.into(), Arc::new(err))
    }

    /// Attaches the failing stage and artifact name to an error.
    pub fn in_stage(self, stage: PipelineStage, artifact: impl Into<String>) -> Self {
        match self {
            already @ ArtError::StageFailed { .. } => already,
            other => ArtError::StageFailed {
                stage,
                artifact: artifact.into(),
                source: Box::new(other),
            },
        }
    }

    /// Configuration and archive-safety problems are never worth retrying.
    pub fn is_fatal_input(&self) -> bool {
        match self {
            ArtError::Config(_) | ArtError::ArchiveSafety(_) => true,
            ArtError::StageFailed { source, .. } => source.is_fatal_input(),
            _ => false,
        }
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root_cause(&self) -> &ArtError {
        match self {
            ArtError::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<std::io::Error> for ArtError {
    fn from(err: std::io::Error) -> Self {
        ArtError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for ArtError {
    fn from(err: reqwest::Error) -> Self {
        ArtError::Http(Arc::new(err))
    }
}

impl From<toml::de::Error> for ArtError {
    fn from(err: toml::de::Error) -> Self {
        ArtError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ArtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapping_is_not_nested() {
        let err = ArtError::Config("empty version".to_string())
            .in_stage(PipelineStage::Locating, "dbg")
            .in_stage(PipelineStage::Downloading, "dbg");
        match &err {
            ArtError::StageFailed { stage, .. } => assert_eq!(*stage, PipelineStage::Locating),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_fatal_input());
        assert!(matches!(err.root_cause(), ArtError::Config(_)));
    }

    #[test]
    fn io_error_names_path() {
        let err = ArtError::io_at(
            "/tmp/dest",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/dest"));
        assert!(!err.is_fatal_input());
    }
}
