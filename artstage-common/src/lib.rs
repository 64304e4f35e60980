// artstage-common/src/lib.rs
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;

// Re-export key types
pub use config::Config;
pub use error::{ArtError, Result};
pub use model::{ArtifactDescriptor, DownloadStatus, DownloadTask};
pub use pipeline::{PipelineEvent, PipelineStage, PipelineState};
