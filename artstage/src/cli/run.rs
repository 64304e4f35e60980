// artstage/src/cli/run.rs
use artstage_common::config::Config;
use artstage_common::error::Result;
use artstage_common::pipeline::{PipelineEvent, PipelineStage};
use artstage_core::{Pipeline, PipelineReport};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

use super::overrides::Overrides;

const EVENT_CHANNEL_SIZE: usize = 100;

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

impl RunArgs {
    #[instrument(skip_all, fields(stop_after = %stop_after))]
    pub async fn run(&self, config: Config, stop_after: PipelineStage) -> Result<()> {
        let (event_tx, event_rx) = broadcast::channel::<PipelineEvent>(EVENT_CHANNEL_SIZE);
        let status_handle = tokio::spawn(super::status::handle_events(event_rx));
        debug!("CLI status handler task spawned.");

        let mut pipeline = Pipeline::new(config)
            .stop_after(stop_after)
            .with_events(event_tx);
        let outcome = pipeline.run().await;
        // Dropping the pipeline closes the event channel.
        drop(pipeline);

        if let Err(e) = status_handle.await {
            warn!("Status display task ended abnormally: {}", e);
        }

        let report = outcome?;
        print_summary(&report, stop_after);
        Ok(())
    }
}

fn print_summary(report: &PipelineReport, stop_after: PipelineStage) {
    let mut parts = vec![format!(
        "{} downloaded, {} reused",
        report.network_downloads(),
        report.reused.len()
    )];
    if stop_after >= PipelineStage::Extracting {
        parts.push(format!(
            "{} extracted, {} up to date",
            report.extracted.len(),
            report.extraction_skipped.len()
        ));
    }
    if stop_after >= PipelineStage::Staging {
        parts.push(format!(
            "{} files copied into {} destinations",
            report.files_copied(),
            report.destinations.len()
        ));
    }
    println!("{}{}", "==> ".bold().blue(), parts.join("; ").bold());
}
