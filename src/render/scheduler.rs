//! Sequential render scheduler.
//!
//! Drives a job queue one job at a time: exactly one image request is in
//! flight, every resolved job is followed by the configured pause, and a
//! quota failure stops the whole pass. The scheduler owns the queue for the
//! duration of [`RenderScheduler::run`] and hands it back in the
//! [`RenderReport`]; observers only ever see [`PipelineSnapshot`] copies.

use super::classify::{classify_failure, FailureClass};
use super::jobs::{ImageGenerationJob, JobStatus};
use crate::api::ImageModel;
use crate::config::{AspectRatio, GenerationSettings};
use crate::export::DownloadStager;
use crate::pipeline::{progress_of, PipelineSnapshot, PipelineStatus};
use crate::usage::UsageCounter;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const QUOTA_STOP_MESSAGE: &str =
    "Image generation stopped: Your daily free quota has been exceeded.";

/// What a finished pass leaves behind.
#[derive(Debug, Clone)]
pub struct RenderReport {
    /// `Completed`, `Error`, or `Idle` when the pass was cancelled.
    pub status: PipelineStatus,
    pub jobs: Vec<ImageGenerationJob>,
    pub error: Option<String>,
}

enum Step {
    Continue,
    Fatal(String),
    Cancelled,
}

pub struct RenderScheduler {
    images: Arc<dyn ImageModel>,
    settings: GenerationSettings,
    aspect_ratio: AspectRatio,
    jobs: Vec<ImageGenerationJob>,
    cursor: usize,
    usage: Option<UsageCounter>,
    downloads: Option<DownloadStager>,
    snapshots: watch::Sender<PipelineSnapshot>,
}

impl RenderScheduler {
    pub fn new(
        images: Arc<dyn ImageModel>,
        jobs: Vec<ImageGenerationJob>,
        settings: GenerationSettings,
        aspect_ratio: AspectRatio,
    ) -> Self {
        let (snapshots, _) = watch::channel(PipelineSnapshot::default());
        Self {
            images,
            settings,
            aspect_ratio,
            jobs,
            cursor: 0,
            usage: None,
            downloads: None,
            snapshots,
        }
    }

    pub fn with_usage(mut self, usage: UsageCounter) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Target for auto-downloads; only used when `auto_download` is set.
    pub fn with_downloads(mut self, downloads: DownloadStager) -> Self {
        self.downloads = Some(downloads);
        self
    }

    /// Publish progress on an existing channel instead of a private one.
    pub fn with_snapshots(mut self, snapshots: watch::Sender<PipelineSnapshot>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.subscribe()
    }

    /// Processes the queue until it is exhausted, a quota failure stops it,
    /// or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> RenderReport {
        info!("Rendering {} image job(s)", self.jobs.len());
        self.publish(PipelineStatus::GeneratingImages, None);

        while self.cursor < self.jobs.len() {
            if cancel.is_cancelled() {
                return self.cancelled();
            }

            // Resolved out of band; never render a job twice.
            if self.jobs[self.cursor].status != JobStatus::Pending {
                self.cursor += 1;
                continue;
            }

            match self.process_current(&cancel).await {
                Step::Continue => {}
                Step::Fatal(message) => return self.finish(PipelineStatus::Error, Some(message)),
                Step::Cancelled => return self.cancelled(),
            }

            let delay = self.settings.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(),
                _ = tokio::time::sleep(delay) => {}
            }
            self.cursor += 1;
            self.publish(PipelineStatus::GeneratingImages, None);
        }

        info!("All image jobs resolved");
        self.finish(PipelineStatus::Completed, None)
    }

    async fn process_current(&mut self, cancel: &CancellationToken) -> Step {
        let index = self.cursor;
        let cancel = cancel.clone();

        self.jobs[index].status = JobStatus::Generating;
        self.publish(PipelineStatus::GeneratingImages, None);

        let job = &self.jobs[index];
        info!(
            "Generating image for job {} ({}/{})",
            job.id,
            index + 1,
            self.jobs.len()
        );
        let result = self.images.generate_image(&job.prompt, self.aspect_ratio).await;

        if cancel.is_cancelled() {
            warn!("Discarding result for job {} after cancellation", self.jobs[index].id);
            return Step::Cancelled;
        }

        match result {
            Ok(image_url) => {
                let job = &mut self.jobs[index];
                job.status = JobStatus::Completed;
                job.image_url = Some(image_url);
                info!("Job {} completed", job.id);
                self.after_success(index).await;
                self.publish(PipelineStatus::GeneratingImages, None);
                Step::Continue
            }
            Err(e) => {
                let message = e.to_string();
                let job = &mut self.jobs[index];
                job.status = JobStatus::Error;
                job.error = Some(message.clone());
                self.publish(PipelineStatus::GeneratingImages, None);

                match classify_failure(&message) {
                    FailureClass::QuotaExhausted => {
                        error!("Job {} hit the quota, stopping: {}", self.jobs[index].id, message);
                        Step::Fatal(QUOTA_STOP_MESSAGE.to_string())
                    }
                    FailureClass::SafetyFilter => {
                        warn!("Job {} rejected by safety filters", self.jobs[index].id);
                        Step::Continue
                    }
                    FailureClass::Other => {
                        warn!("Job {} failed: {}", self.jobs[index].id, message);
                        Step::Continue
                    }
                }
            }
        }
    }

    async fn after_success(&self, index: usize) {
        if let Some(usage) = &self.usage {
            if let Err(e) = usage.increment().await {
                warn!("Failed to update usage counter: {}", e);
            }
        }

        if self.settings.auto_download {
            if let Some(downloads) = &self.downloads {
                if let Err(e) = downloads.save(&self.jobs[index]).await {
                    warn!("Auto-download failed for job {}: {}", self.jobs[index].id, e);
                }
            }
        }
    }

    fn publish(&self, status: PipelineStatus, error: Option<String>) {
        self.snapshots.send_replace(PipelineSnapshot {
            status,
            jobs: progress_of(&self.jobs),
            cursor: self.cursor,
            error,
        });
    }

    fn cancelled(self) -> RenderReport {
        info!("Render pass cancelled at job {}", self.cursor + 1);
        self.finish(PipelineStatus::Idle, None)
    }

    fn finish(self, status: PipelineStatus, error: Option<String>) -> RenderReport {
        self.publish(status, error.clone());
        RenderReport {
            status,
            jobs: self.jobs,
            error,
        }
    }
}
