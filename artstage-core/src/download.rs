// artstage-core/src/download.rs
use std::sync::Arc;

use artstage_common::config::Config;
use artstage_common::error::{ArtError, Result};
use artstage_common::model::{DownloadStatus, DownloadTask};
use artstage_common::pipeline::PipelineEvent;
use artstage_net::{build_http_client, download_archive, reuse_existing, ArchiveRequest};
use reqwest::Client as HttpClient;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument};

/// Fetches the archives for a set of download tasks.
///
/// Archives already on disk are reused without a request. Downloads run
/// concurrently up to `max_concurrent`. A failing task does not stop
/// the others; `fetch` returns once every task is `Downloaded` or `Failed`.
#[derive(Clone)]
pub struct Downloader {
    http_client: HttpClient,
    allow_http: bool,
    max_concurrent: usize,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl Downloader {
    pub fn new(http_client: HttpClient, allow_http: bool, max_concurrent: usize) -> Self {
        Self {
            http_client,
            allow_http,
            max_concurrent: max_concurrent.max(1),
            event_tx: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_http_client(config.connect_timeout, config.download_timeout)?;
        Ok(Self::new(
            client,
            config.allow_http,
            config.max_concurrent_downloads,
        ))
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn fetch(&self, tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut download_tasks = JoinSet::new();

        for (index, task) in tasks.iter().enumerate() {
            let permits = Arc::clone(&permits);
            let task = task.clone();
            let this = self.clone();

            download_tasks.spawn(async move {
                let request = ArchiveRequest {
                    label: &task.platform_id,
                    url: &task.url,
                    destination: &task.destination_path,
                    sha256: task.sha256.as_deref(),
                    allow_http: this.allow_http,
                };
                let result = match reuse_existing(&request) {
                    Ok(Some(existing)) => Ok(existing),
                    Ok(None) => {
                        let _permit = permits.acquire_owned().await.ok();
                        this.emit(PipelineEvent::DownloadStarted {
                            platform_id: task.platform_id.clone(),
                            url: task.url.clone(),
                        });
                        download_archive(&this.http_client, request).await
                    }
                    Err(e) => Err(e),
                };
                (index, result)
            });
        }

        let mut finished = tasks;
        while let Some(joined) = download_tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    // The index is lost with a panicked task; the pending sweep
                    // below marks it failed.
                    error!("[Downloader] Download task panicked: {}", join_err);
                    continue;
                }
            };
            let task = &mut finished[index];
            match result {
                Ok(fetched) => {
                    if fetched.reused {
                        debug!(
                            "[Downloader] {} already present at {}",
                            task.platform_id,
                            task.destination_path.display()
                        );
                        self.emit(PipelineEvent::DownloadSkipped {
                            platform_id: task.platform_id.clone(),
                            path: task.destination_path.clone(),
                        });
                    } else {
                        debug!(
                            "[Downloader] {} downloaded ({} bytes)",
                            task.platform_id, fetched.size_bytes
                        );
                        self.emit(PipelineEvent::DownloadFinished {
                            platform_id: task.platform_id.clone(),
                            path: task.destination_path.clone(),
                            size_bytes: fetched.size_bytes,
                        });
                    }
                    task.status = DownloadStatus::Downloaded {
                        size_bytes: fetched.size_bytes,
                        reused: fetched.reused,
                    };
                }
                Err(e) => {
                    error!("[Downloader] {} failed: {}", task.platform_id, e);
                    self.emit(PipelineEvent::download_failed(
                        task.platform_id.clone(),
                        task.url.clone(),
                        &e,
                    ));
                    task.status = DownloadStatus::Failed(e);
                }
            }
        }

        for task in finished
            .iter_mut()
            .filter(|t| matches!(t.status, DownloadStatus::Pending))
        {
            task.status = DownloadStatus::Failed(ArtError::Generic(format!(
                "download task for {} did not complete",
                task.platform_id
            )));
        }
        finished
    }
}
