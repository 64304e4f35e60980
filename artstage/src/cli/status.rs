// artstage/src/cli/status.rs
use artstage_common::pipeline::{PipelineEvent, PipelineStage};
use colored::*;
use indicatif::ProgressBar;
use tokio::sync::broadcast;

use super::ui::{create_spinner, format_bytes};

fn stage_message(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Locating => "Locating release archives...",
        PipelineStage::Downloading => "Downloading archives...",
        PipelineStage::Extracting => "Extracting archives...",
        PipelineStage::Staging => "Staging into destinations...",
    }
}

/// Renders pipeline events as one spinner per stage plus a line per
/// platform or destination. Returns once the pipeline reports its outcome or
/// the sender side is dropped.
pub async fn handle_events(mut event_rx: broadcast::Receiver<PipelineEvent>) {
    let mut spinner: Option<ProgressBar> = None;

    loop {
        match event_rx.recv().await {
            Ok(event) => {
                let line = match event {
                    PipelineEvent::PipelineStarted {
                        artifact,
                        version,
                        platform_count,
                    } => Some(format!(
                        "{} {} {} ({} platforms)",
                        "==>".bold().blue(),
                        artifact.bold(),
                        version.cyan(),
                        platform_count
                    )),
                    PipelineEvent::StageStarted { stage } => {
                        if let Some(pb) = spinner.take() {
                            pb.finish_and_clear();
                        }
                        spinner = Some(create_spinner(stage_message(stage)));
                        None
                    }
                    PipelineEvent::StageFinished { .. } => {
                        if let Some(pb) = spinner.take() {
                            pb.finish_and_clear();
                        }
                        None
                    }
                    PipelineEvent::DownloadStarted { platform_id, .. } => {
                        if let Some(pb) = &spinner {
                            pb.set_message(format!("Downloading {platform_id}..."));
                        }
                        None
                    }
                    PipelineEvent::DownloadSkipped { platform_id, .. } => Some(format!(
                        "  {} {} {}",
                        "·".dimmed(),
                        platform_id.cyan(),
                        "already downloaded".dimmed()
                    )),
                    PipelineEvent::DownloadFinished {
                        platform_id,
                        size_bytes,
                        ..
                    } => Some(format!(
                        "  {} {} downloaded ({})",
                        "↓".green(),
                        platform_id.cyan(),
                        format_bytes(size_bytes)
                    )),
                    PipelineEvent::DownloadFailed {
                        platform_id, error, ..
                    } => Some(format!(
                        "  {} {}: {}",
                        "✗".red().bold(),
                        platform_id.cyan(),
                        error.red()
                    )),
                    PipelineEvent::ExtractStarted { .. } => None,
                    PipelineEvent::ExtractSkipped { platform_id } => Some(format!(
                        "  {} {} {}",
                        "·".dimmed(),
                        platform_id.cyan(),
                        "already extracted".dimmed()
                    )),
                    PipelineEvent::ExtractFinished { platform_id, files } => Some(format!(
                        "  {} {} extracted ({} files)",
                        "⚙".blue(),
                        platform_id.cyan(),
                        files
                    )),
                    PipelineEvent::DestinationStaged {
                        path,
                        copied,
                        unchanged,
                    } => Some(format!(
                        "  {} {} ({} copied, {} unchanged)",
                        "→".green(),
                        path.display().to_string().cyan(),
                        copied,
                        unchanged
                    )),
                    PipelineEvent::DestinationFailed { path, error } => Some(format!(
                        "  {} {}: {}",
                        "✗".red().bold(),
                        path.display().to_string().cyan(),
                        error.red()
                    )),
                    PipelineEvent::PipelineFinished { duration_secs } => {
                        if let Some(pb) = spinner.take() {
                            pb.finish_and_clear();
                        }
                        println!(
                            "{} in {:.2}s",
                            "Pipeline finished".green().bold(),
                            duration_secs
                        );
                        break;
                    }
                    PipelineEvent::PipelineFailed { stage, .. } => {
                        if let Some(pb) = spinner.take() {
                            pb.abandon_with_message(format!("{} {}", stage, "failed".red().bold()));
                        }
                        break;
                    }
                };
                if let Some(line) = line {
                    match &spinner {
                        Some(pb) => pb.println(line),
                        None => println!("{line}"),
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Status display skipped {} events", skipped);
            }
        }
    }

    if let Some(pb) = spinner.take() {
        pb.finish_and_clear();
    }
}
