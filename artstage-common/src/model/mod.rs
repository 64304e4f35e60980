// artstage-common/src/model/mod.rs
pub mod artifact;

pub use artifact::{ArtifactDescriptor, DownloadStatus, DownloadTask};
