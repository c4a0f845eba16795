//! Process-wide pipeline state.
//!
//! [`Pipeline`] owns the status, the current plan and the job queue. Plan
//! generation and render passes go through it so that only one of them can
//! act at a time; observers follow along through [`Pipeline::subscribe`].

use crate::api::{ImageModel, TextModel};
use crate::config::{GenerationSettings, StyleConfig};
use crate::error::{Result, StoryboardError};
use crate::export::DownloadStager;
use crate::render::{build_jobs, ImageGenerationJob, JobStatus, RenderScheduler};
use crate::scene::planner::{PlanGenerator, PlanRequest};
use crate::scene::ScriptPlan;
use crate::usage::UsageCounter;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStatus {
    #[default]
    Idle,
    GeneratingPrompts,
    GeneratingImages,
    Completed,
    Error,
}

/// Progress of one job as observers see it. Rendered images are not
/// carried; read them from [`Pipeline::jobs`] once the pass is over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobProgress {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ImageGenerationJob> for JobProgress {
    fn from(job: &ImageGenerationJob) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            error: job.error.clone(),
        }
    }
}

pub fn progress_of(jobs: &[ImageGenerationJob]) -> Vec<JobProgress> {
    jobs.iter().map(JobProgress::from).collect()
}

/// Read-only view handed to observers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub jobs: Vec<JobProgress>,
    /// Index of the job currently being worked on.
    pub cursor: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The queue was empty; the pipeline never entered `GeneratingImages`.
    NothingToRender,
    Finished(PipelineStatus),
}

pub struct Pipeline {
    planner: PlanGenerator,
    images: Arc<dyn ImageModel>,
    style: StyleConfig,
    settings: GenerationSettings,
    usage: Option<UsageCounter>,
    downloads: Option<DownloadStager>,
    status: PipelineStatus,
    plan: Option<ScriptPlan>,
    jobs: Vec<ImageGenerationJob>,
    error: Option<String>,
    cancel: CancellationToken,
    snapshots: watch::Sender<PipelineSnapshot>,
}

impl Pipeline {
    pub fn new(
        text: Arc<dyn TextModel>,
        images: Arc<dyn ImageModel>,
        style: StyleConfig,
        settings: GenerationSettings,
    ) -> Self {
        let (snapshots, _) = watch::channel(PipelineSnapshot::default());
        Self {
            planner: PlanGenerator::new(text),
            images,
            style,
            settings,
            usage: None,
            downloads: None,
            status: PipelineStatus::Idle,
            plan: None,
            jobs: Vec::new(),
            error: None,
            cancel: CancellationToken::new(),
            snapshots,
        }
    }

    pub fn with_usage(mut self, usage: UsageCounter) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_downloads(mut self, downloads: DownloadStager) -> Self {
        self.downloads = Some(downloads);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.subscribe()
    }

    /// Token that stops the current (or next) render pass when cancelled.
    /// This is how a running [`Pipeline::render`] is interrupted.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    pub fn plan(&self) -> Option<&ScriptPlan> {
        self.plan.as_ref()
    }

    pub fn jobs(&self) -> &[ImageGenerationJob] {
        &self.jobs
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Settings for the next pass; a running pass keeps its own copy.
    pub fn set_settings(&mut self, settings: GenerationSettings) {
        self.settings = settings;
    }

    /// Generates a fresh plan and prepares its jobs. Any earlier plan and
    /// queue are dropped first; the pipeline's own style is applied to the
    /// request.
    pub async fn generate_plan(&mut self, mut request: PlanRequest) -> Result<()> {
        self.plan = None;
        self.jobs.clear();
        self.error = None;
        self.set_status(PipelineStatus::GeneratingPrompts);

        request.style = self.style.clone();
        match self.planner.generate_plan(&request).await {
            Ok(plan) => {
                info!(
                    "Plan ready: {} scene(s), {} character(s)",
                    plan.scenes.len(),
                    plan.characters.len()
                );
                self.install_plan(plan);
                self.set_status(PipelineStatus::Idle);
                Ok(())
            }
            Err(e) => {
                error!("Plan generation failed: {}", e);
                self.error = Some(e.to_string());
                self.set_status(PipelineStatus::Error);
                Err(e)
            }
        }
    }

    /// Adopts an existing plan, e.g. one exported earlier.
    pub fn load_plan(&mut self, plan: ScriptPlan) {
        self.error = None;
        self.install_plan(plan);
        self.set_status(PipelineStatus::Idle);
    }

    /// Runs one render pass over the prepared queue.
    pub async fn render(&mut self) -> Result<RenderOutcome> {
        if self.plan.is_none() {
            return Err(StoryboardError::Validation(
                "No plan available; generate or load one first".to_string(),
            ));
        }
        if self.jobs.is_empty() {
            info!("No scenes were marked for image generation");
            return Ok(RenderOutcome::NothingToRender);
        }

        self.error = None;
        self.status = PipelineStatus::GeneratingImages;

        let mut scheduler = RenderScheduler::new(
            self.images.clone(),
            std::mem::take(&mut self.jobs),
            self.settings.clone(),
            self.style.aspect_ratio,
        )
        .with_snapshots(self.snapshots.clone());
        if let Some(usage) = &self.usage {
            scheduler = scheduler.with_usage(usage.clone());
        }
        if let Some(downloads) = &self.downloads {
            scheduler = scheduler.with_downloads(downloads.clone());
        }

        let report = scheduler.run(self.cancel.clone()).await;
        self.jobs = report.jobs;
        self.error = report.error;
        let requeued = self.requeue_interrupted();
        if requeued > 0 {
            info!("Returned {} interrupted job(s) to the queue", requeued);
        }
        self.set_status(report.status);
        Ok(RenderOutcome::Finished(self.status))
    }

    /// Cancels the current token, issues a fresh one for the next pass and
    /// returns to `Idle`. A pass that is still running must be stopped
    /// through [`Pipeline::cancellation`]; `render` holds the pipeline until
    /// it returns.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.error = None;
        self.requeue_interrupted();
        self.set_status(PipelineStatus::Idle);
    }

    /// A job left `Generating` by a cancelled pass never got its result;
    /// put it back so the next pass renders it.
    fn requeue_interrupted(&mut self) -> usize {
        let mut requeued = 0;
        for job in self.jobs.iter_mut().filter(|j| j.status == JobStatus::Generating) {
            job.status = JobStatus::Pending;
            requeued += 1;
        }
        requeued
    }

    fn install_plan(&mut self, plan: ScriptPlan) {
        self.jobs = build_jobs(&plan, &self.settings).into_jobs();
        info!("Prepared {} image job(s)", self.jobs.len());
        self.plan = Some(plan);
    }

    fn set_status(&mut self, status: PipelineStatus) {
        self.status = status;
        self.snapshots.send_replace(PipelineSnapshot {
            status,
            jobs: progress_of(&self.jobs),
            cursor: 0,
            error: self.error.clone(),
        });
    }
}
