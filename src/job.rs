pub mod id;
pub mod pipeline;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    config::{Config, PipelineConfig},
    error::{Error, Result},
    outline::Outline,
    producer::OpenAiGenerator,
    progress::ProgressStore,
    store::CourseStore,
};
use id::JobIdGenerator;
use pipeline::{JobSpec, Pipeline};

/// Returned to the caller as soon as a job is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LaunchReceipt {
    pub job_id: String,
    pub course_id: i64,
    pub status: String,
    pub message: String,
}

/// Job Registry / Launcher.
///
/// Validates the outline, allocates an id, registers the `starting` state and spawns
/// the orchestrator. At most `max_concurrent_jobs` jobs run at once; further launches
/// are rejected with [`Error::Busy`] instead of queueing.
pub struct Launcher {
    pipeline: Arc<Pipeline>,
    progress: Arc<ProgressStore>,
    ids: JobIdGenerator,
    permits: Arc<Semaphore>,
    max_jobs: usize,
}

impl Launcher {
    pub fn new(pipeline: Arc<Pipeline>, progress: Arc<ProgressStore>, config: &PipelineConfig) -> Self {
        let max_jobs = config.max_concurrent_jobs.max(1);
        Self {
            pipeline,
            progress,
            ids: JobIdGenerator::new(config.worker_id()),
            permits: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
        }
    }

    /// Production wiring: an OpenAI compatible generator writing through `store`.
    pub fn from_config(config: &Config, store: Arc<dyn CourseStore>) -> Self {
        let progress = Arc::new(ProgressStore::new(store, config.pipeline.snapshot_every));
        let generator = Arc::new(OpenAiGenerator::new(config.ai.clone()));
        let pipeline = Arc::new(Pipeline::new(generator, progress.clone(), &config.pipeline));
        Self::new(pipeline, progress, &config.pipeline)
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    /// Jobs currently holding a permit.
    pub fn running(&self) -> usize {
        self.max_jobs - self.permits.available_permits()
    }

    pub fn start(&self, course_id: i64, course_name: &str, outline: Outline) -> Result<LaunchReceipt> {
        self.spawn(course_id, course_name, outline)
            .map(|(receipt, _)| receipt)
    }

    /// Like [`Launcher::start`], also handing back the orchestrator task.
    pub fn spawn(
        &self,
        course_id: i64,
        course_name: &str,
        outline: Outline,
    ) -> Result<(LaunchReceipt, JoinHandle<()>)> {
        outline.validate()?;
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::Busy {
                running: self.max_jobs,
            })?;
        let job_id = self.ids.next_id();
        self.progress.register(&job_id, course_id, course_name);
        info!(
            job_id = %job_id,
            course_id,
            "launching content generation for {} leaves",
            outline.total_items()
        );

        let job = JobSpec {
            job_id: job_id.clone(),
            course_id,
            course_name: course_name.to_string(),
            outline,
        };
        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            pipeline.run(job).await;
        });
        let receipt = LaunchReceipt {
            job_id,
            course_id,
            status: "processing".to_string(),
            message: "Content generation started in background".to_string(),
        };
        Ok((receipt, handle))
    }
}
