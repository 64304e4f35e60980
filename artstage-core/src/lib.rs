// artstage-core/src/lib.rs
pub mod download;
pub mod extract;
pub mod locate;
pub mod pipeline;
pub mod stage;

// Re-export key types for easier use by the CLI crate
pub use download::Downloader;
pub use extract::{extract, ExtractSummary};
pub use locate::{locate, locate_with_config};
pub use pipeline::{clean_staging, Pipeline, PipelineReport};
pub use stage::{stage, DestinationReport, StageReport};
