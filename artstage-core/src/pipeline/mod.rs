// artstage-core/src/pipeline/mod.rs
mod report;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use artstage_common::config::Config;
use artstage_common::error::{ArtError, Result};
use artstage_common::model::DownloadTask;
use artstage_common::pipeline::{PipelineEvent, PipelineStage, PipelineState};
use artstage_net::sha256_file;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

pub use self::report::PipelineReport;
use crate::download::Downloader;
use crate::extract::{extract, ExtractSummary};
use crate::locate::locate_with_config;
use crate::stage::stage_subtrees;

/// One fetch-and-stage run over a [`Config`].
///
/// A pipeline value is single use: it walks
/// `Idle -> Locating -> Downloading -> Extracting -> Staging -> Done` once, or
/// ends in `Failed` at the stage that broke. Re-invoking the whole run is the
/// recovery path; completed work is detected from the files left behind.
pub struct Pipeline {
    config: Config,
    state: PipelineState,
    stop_after: PipelineStage,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
    report: PipelineReport,
}

enum ExtractOutcome {
    Extracted(ExtractSummary),
    Skipped,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            stop_after: PipelineStage::Staging,
            event_tx: None,
            report: PipelineReport::default(),
        }
    }

    /// Ends the run successfully once `stage` has completed.
    pub fn stop_after(mut self, stage: PipelineStage) -> Self {
        self.stop_after = stage;
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    fn artifact_label(&self) -> String {
        format!("{} {}", self.config.artifact.name, self.config.artifact.version)
    }

    fn platform_label(&self, platform_id: &str) -> String {
        format!("{} [{}]", self.artifact_label(), platform_id)
    }

    fn set_state(&mut self, next: PipelineState) -> Result<()> {
        self.state = self.state.transition(next)?;
        debug!("Pipeline state -> {}", self.state);
        Ok(())
    }

    fn enter(&mut self, stage: PipelineStage) -> Result<()> {
        self.set_state(PipelineState::Running(stage))?;
        info!("Starting {} stage for {}", stage, self.artifact_label());
        self.emit(PipelineEvent::StageStarted { stage });
        Ok(())
    }

    /// Marks `stage` complete; returns true when the run should stop here.
    fn leave(&self, stage: PipelineStage) -> bool {
        self.emit(PipelineEvent::StageFinished { stage });
        stage == self.stop_after
    }

    #[instrument(skip_all, fields(artifact = %self.config.artifact.name, version = %self.config.artifact.version))]
    pub async fn run(&mut self) -> Result<PipelineReport> {
        if self.state != PipelineState::Idle {
            return Err(ArtError::InvalidTransition {
                from: self.state.to_string(),
                to: PipelineState::Running(PipelineStage::Locating).to_string(),
            });
        }

        let started = Instant::now();
        self.emit(PipelineEvent::PipelineStarted {
            artifact: self.config.artifact.name.clone(),
            version: self.config.artifact.version.clone(),
            platform_count: self.config.artifact.platform_ids.len(),
        });

        match self.run_stages().await {
            Ok(()) => {
                self.set_state(PipelineState::Done)?;
                self.report.duration = started.elapsed();
                self.emit(PipelineEvent::PipelineFinished {
                    duration_secs: self.report.duration.as_secs_f64(),
                });
                info!(
                    "Pipeline finished for {} in {:.2}s",
                    self.artifact_label(),
                    self.report.duration.as_secs_f64()
                );
                Ok(self.report.clone())
            }
            Err(err) => {
                let stage = match self.state {
                    PipelineState::Running(stage) => stage,
                    _ => PipelineStage::Locating,
                };
                if let Ok(failed) = self.state.transition(PipelineState::Failed { stage }) {
                    self.state = failed;
                }
                let err = err.in_stage(stage, self.artifact_label());
                error!("{}", err);
                self.emit(PipelineEvent::PipelineFailed {
                    stage,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_stages(&mut self) -> Result<()> {
        self.enter(PipelineStage::Locating)?;
        self.config.validate()?;
        let tasks = locate_with_config(&self.config)?;
        self.report.tasks = tasks.clone();
        if self.leave(PipelineStage::Locating) {
            return Ok(());
        }

        self.enter(PipelineStage::Downloading)?;
        let tasks = self.download_all(tasks).await?;
        if self.leave(PipelineStage::Downloading) {
            return Ok(());
        }

        self.enter(PipelineStage::Extracting)?;
        self.extract_all(&tasks).await?;
        if self.leave(PipelineStage::Extracting) {
            return Ok(());
        }

        self.enter(PipelineStage::Staging)?;
        self.stage_all().await?;
        self.leave(PipelineStage::Staging);
        Ok(())
    }

    async fn download_all(&mut self, tasks: Vec<DownloadTask>) -> Result<Vec<DownloadTask>> {
        let mut downloader = Downloader::from_config(&self.config)?;
        if let Some(tx) = &self.event_tx {
            downloader = downloader.with_events(tx.clone());
        }
        let tasks = downloader.fetch(tasks).await;
        self.report.tasks = tasks.clone();

        let mut first_failure = None;
        for task in &tasks {
            match task.error() {
                Some(err) => {
                    if first_failure.is_none() {
                        first_failure = Some(
                            err.clone()
                                .in_stage(PipelineStage::Downloading, self.platform_label(&task.platform_id)),
                        );
                    }
                }
                None if task.was_reused() => self.report.reused.push(task.platform_id.clone()),
                None => self.report.downloaded.push(task.platform_id.clone()),
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(tasks),
        }
    }

    async fn extract_all(&mut self, tasks: &[DownloadTask]) -> Result<()> {
        let staging_root = self.config.staging_root().to_path_buf();
        let mut jobs = JoinSet::new();

        for task in tasks {
            self.emit(PipelineEvent::ExtractStarted {
                platform_id: task.platform_id.clone(),
            });
            let platform_id = task.platform_id.clone();
            let archive = task.destination_path.clone();
            let subdir = self.config.extraction_subdir(&task.platform_id);
            let marker = self.config.extraction_marker_path(&task.platform_id);
            let root = staging_root.clone();
            jobs.spawn_blocking(move || {
                let outcome = extract_platform(&archive, &subdir, &root, &marker);
                (platform_id, outcome)
            });
        }

        let mut outcomes = HashMap::new();
        while let Some(joined) = jobs.join_next().await {
            let (platform_id, outcome) = joined
                .map_err(|e| ArtError::Generic(format!("extraction task failed to complete: {e}")))?;
            outcomes.insert(platform_id, outcome);
        }

        let mut first_failure = None;
        for task in tasks {
            let id = &task.platform_id;
            match outcomes.remove(id) {
                Some(Ok(ExtractOutcome::Extracted(summary))) => {
                    self.emit(PipelineEvent::ExtractFinished {
                        platform_id: id.clone(),
                        files: summary.files,
                    });
                    self.report.extracted.push(id.clone());
                }
                Some(Ok(ExtractOutcome::Skipped)) => {
                    debug!("Extraction of {} is up to date", id);
                    self.emit(PipelineEvent::ExtractSkipped {
                        platform_id: id.clone(),
                    });
                    self.report.extraction_skipped.push(id.clone());
                }
                Some(Err(err)) => {
                    error!("Extracting {} failed: {}", id, err);
                    if first_failure.is_none() {
                        first_failure =
                            Some(err.in_stage(PipelineStage::Extracting, self.platform_label(id)));
                    }
                }
                None => {
                    if first_failure.is_none() {
                        first_failure = Some(ArtError::Generic(format!(
                            "no extraction result for {id}"
                        )));
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stage_all(&mut self) -> Result<()> {
        let source = self.config.extracted_root();
        let destinations: Vec<PathBuf> = self
            .config
            .destinations
            .iter()
            .map(|d| d.join("bin"))
            .collect();

        // Only the platforms of this run; the staging tree may still hold
        // others from earlier runs.
        let subtrees: Vec<PathBuf> = self
            .config
            .artifact
            .platform_ids
            .iter()
            .map(PathBuf::from)
            .collect();

        let outcomes =
            tokio::task::spawn_blocking(move || stage_subtrees(&source, &subtrees, &destinations))
                .await
                .map_err(|e| ArtError::Generic(format!("staging task failed to complete: {e}")))??;

        let mut first_failure = None;
        for (path, outcome) in outcomes {
            match outcome {
                Ok(done) => {
                    self.emit(PipelineEvent::DestinationStaged {
                        path: path.clone(),
                        copied: done.copied,
                        unchanged: done.unchanged,
                    });
                    self.report.destinations.push(done);
                }
                Err(err) => {
                    error!("Staging into {} failed: {}", path.display(), err);
                    self.emit(PipelineEvent::DestinationFailed {
                        path,
                        error: err.to_string(),
                    });
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Extracts one platform archive unless the marker shows the same archive was
/// already extracted into an existing target directory.
fn extract_platform(
    archive: &Path,
    subdir: &Path,
    staging_root: &Path,
    marker: &Path,
) -> Result<ExtractOutcome> {
    let digest = sha256_file(archive)?;
    let target = staging_root.join(subdir);

    let recorded = fs::read_to_string(marker).ok();
    if target.is_dir() && recorded.as_deref().map(str::trim) == Some(digest.as_str()) {
        return Ok(ExtractOutcome::Skipped);
    }

    // An interrupted extraction must not leave a trusted marker behind.
    match fs::remove_file(marker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ArtError::io_at(marker, e)),
    }

    let summary = extract(archive, subdir, staging_root)?;
    fs::write(marker, format!("{digest}\n")).map_err(|e| ArtError::io_at(marker, e))?;
    Ok(ExtractOutcome::Extracted(summary))
}

/// Removes the staging tree (archives, extracted files, markers and logs).
/// Returns false when there was nothing to remove.
pub fn clean_staging(config: &Config) -> Result<bool> {
    let root = config.staging_root();
    if !root.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(root).map_err(|e| ArtError::io_at(root, e))?;
    info!("Removed staging tree {}", root.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use artstage_common::model::ArtifactDescriptor;

    use super::*;

    fn config_in(root: &Path, ids: &[&str]) -> Config {
        Config {
            artifact: ArtifactDescriptor::new(
                "dbg",
                "1.0",
                ids.iter().map(|s| s.to_string()).collect(),
                "https://example/releases",
            ),
            staging_root: root.join("staging"),
            destinations: vec![root.join("dest")],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn locate_only_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new(config_in(dir.path(), &["a", "b"])).stop_after(PipelineStage::Locating);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.tasks.len(), 2);
        assert_eq!(pipeline.state(), PipelineState::Done);
        assert!(!dir.path().join("staging").exists());
    }

    #[tokio::test]
    async fn bad_descriptor_fails_in_locating() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(config_in(dir.path(), &[]));
        let err = pipeline.run().await.unwrap_err();
        assert!(err.is_fatal_input());
        assert_eq!(
            pipeline.state(),
            PipelineState::Failed {
                stage: PipelineStage::Locating
            }
        );
        assert!(err.to_string().starts_with("locate failed for dbg 1.0"));
    }

    #[tokio::test]
    async fn unusable_base_url_fails_in_locating() {
        for (base_url, allow_http) in [
            ("not a url", true),
            ("ftp://example/releases", true),
            ("http://example/releases", false),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let mut config = config_in(dir.path(), &["a"]);
            config.artifact.base_url = base_url.to_string();
            config.allow_http = allow_http;

            let mut pipeline = Pipeline::new(config);
            let err = pipeline.run().await.unwrap_err();
            assert!(matches!(err.root_cause(), ArtError::Config(_)), "{base_url}: {err}");
            assert!(err.is_fatal_input());
            assert_eq!(
                pipeline.state(),
                PipelineState::Failed {
                    stage: PipelineStage::Locating
                }
            );
            assert!(!dir.path().join("staging").exists());
        }
    }

    #[tokio::test]
    async fn a_pipeline_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            Pipeline::new(config_in(dir.path(), &["a"])).stop_after(PipelineStage::Locating);
        pipeline.run().await.unwrap();
        assert!(matches!(
            pipeline.run().await,
            Err(ArtError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn clean_removes_staging_tree() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path(), &["a"]);
        assert!(!clean_staging(&config).unwrap());
        fs::create_dir_all(config.extracted_root().join("a")).unwrap();
        assert!(clean_staging(&config).unwrap());
        assert!(!config.staging_root().exists());
    }
}
