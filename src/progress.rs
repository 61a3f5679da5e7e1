//! Job state and the write-through Progress Store.
//!
//! Every mutation lands in the in-memory mirror first, so polling never waits on the
//! database. The durable row is written on every phase transition and on a throttled
//! cadence while leaves are processed.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    error::{ProducerError, StoreError},
    outline::Leaf,
    producer::{GeneratedContent, content::FAILED_HELP_TEXT},
    store::{CourseStore, ProgressUpdate},
    utils::now_utc,
};

/// Generated text for one leaf, in outline order within its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentItem {
    pub module_id: i64,
    pub module_title: String,
    pub subtitle_id: i64,
    pub subtitle: String,
    pub content: String,
    pub help_text: String,
    pub links: String,
    pub code: String,
    /// row id once persisted
    pub content_id: Option<i64>,
    /// records a leaf level failure instead of generated text
    pub placeholder: bool,
}

impl ContentItem {
    pub fn generated(leaf: &Leaf<'_>, generated: GeneratedContent) -> Self {
        Self {
            module_id: leaf.module_id,
            module_title: leaf.module_title.to_string(),
            subtitle_id: leaf.subtitle_id,
            subtitle: leaf.subtitle.to_string(),
            content: generated.content,
            help_text: generated.help_text,
            links: generated.links,
            code: generated.code,
            content_id: None,
            placeholder: generated.placeholder,
        }
    }

    pub fn failed(leaf: &Leaf<'_>, error: &ProducerError) -> Self {
        Self {
            module_id: leaf.module_id,
            module_title: leaf.module_title.to_string(),
            subtitle_id: leaf.subtitle_id,
            subtitle: leaf.subtitle.to_string(),
            content: format!("Error: {error}"),
            help_text: FAILED_HELP_TEXT.to_string(),
            links: String::new(),
            code: String::new(),
            content_id: None,
            placeholder: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Starting,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Processing,
    Completed,
}

impl QuestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionStatus::Processing => "processing",
            QuestionStatus::Completed => "completed",
        }
    }
}

/// In-memory view of one job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobState {
    pub job_id: String,
    pub course_id: i64,
    pub course_name: String,
    pub phase: JobPhase,
    pub question_status: Option<QuestionStatus>,
    pub error: Option<String>,
    /// unset until the orchestrator has counted the leaves
    pub total_items: Option<usize>,
    pub completed_items: usize,
    pub items: Vec<ContentItem>,
    pub questions_stored: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl JobState {
    fn new(job_id: String, course_id: i64, course_name: String) -> Self {
        let now = now_utc();
        Self {
            job_id,
            course_id,
            course_name,
            phase: JobPhase::Starting,
            question_status: None,
            error: None,
            total_items: None,
            completed_items: 0,
            items: Vec::new(),
            questions_stored: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// `floor(100 * completed / total)`, 0 while the total is unknown.
    pub fn progress_percent(&self) -> u8 {
        match self.total_items {
            Some(total) if total > 0 => {
                (self.completed_items.min(total) * 100 / total) as u8
            }
            _ => 0,
        }
    }

    /// The status string written to the durable row.
    pub fn durable_status(&self) -> String {
        match self.phase {
            JobPhase::Starting => "starting".to_string(),
            JobPhase::Processing if self.completed_items == 0 => "processing".to_string(),
            JobPhase::Processing => format!("processing_{}%", self.progress_percent()),
            JobPhase::Completed => "completed".to_string(),
            JobPhase::Error => format!("error: {}", self.error.as_deref().unwrap_or("unknown")),
        }
    }

    /// Terminal: errored, or completed with the question bank done.
    pub fn is_finished(&self) -> bool {
        match self.phase {
            JobPhase::Error => true,
            JobPhase::Completed => self.question_status == Some(QuestionStatus::Completed),
            _ => false,
        }
    }
}

/// Registry of live jobs plus their durable progress rows.
///
/// Each job is written only by the orchestrator that owns it; any number of readers
/// may take snapshots concurrently.
pub struct ProgressStore {
    jobs: DashMap<String, JobState>,
    durable: Arc<dyn CourseStore>,
    snapshot_every: usize,
}

impl ProgressStore {
    pub fn new(durable: Arc<dyn CourseStore>, snapshot_every: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            durable,
            snapshot_every: snapshot_every.max(1),
        }
    }

    pub fn durable(&self) -> &Arc<dyn CourseStore> {
        &self.durable
    }

    /// Insert the initial `starting` state. Nothing is written durably yet.
    pub fn register(&self, job_id: &str, course_id: i64, course_name: &str) -> JobState {
        let state = JobState::new(job_id.to_string(), course_id, course_name.to_string());
        self.jobs.insert(job_id.to_string(), state.clone());
        state
    }

    pub fn get(&self, job_id: &str) -> Option<JobState> {
        self.jobs.get(job_id).map(|state| state.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Apply `f` to the mirrored state. The map guard is released before returning.
    fn update<R>(&self, job_id: &str, f: impl FnOnce(&mut JobState) -> R) -> Option<R> {
        let mut state = self.jobs.get_mut(job_id)?;
        let result = f(&mut state);
        state.updated_at = now_utc();
        Some(result)
    }

    async fn write_durable(
        &self,
        job_id: &str,
        course_id: i64,
        status: &str,
        question_status: Option<QuestionStatus>,
    ) -> Result<(), StoreError> {
        self.durable
            .upsert_progress(ProgressUpdate {
                course_id,
                job_id,
                status,
                question_status,
            })
            .await
    }

    /// `starting -> processing` with the leaf count fixed.
    pub async fn begin(&self, job_id: &str, total_items: usize) -> Result<(), StoreError> {
        let Some((course_id, status)) = self.update(job_id, |state| {
            state.phase = JobPhase::Processing;
            state.total_items = Some(total_items);
            (state.course_id, state.durable_status())
        }) else {
            return Ok(());
        };
        self.write_durable(job_id, course_id, &status, None).await
    }

    /// Append a finished leaf and bump the counter. Returns the new percentage.
    ///
    /// A failed snapshot only costs observability, it is logged and dropped.
    pub async fn record_leaf(&self, job_id: &str, item: ContentItem) -> u8 {
        let snapshot_every = self.snapshot_every;
        let Some((course_id, status, percent, snapshot)) = self.update(job_id, |state| {
            state.items.push(item);
            state.completed_items += 1;
            let last = state.total_items == Some(state.completed_items);
            let snapshot = last || state.completed_items % snapshot_every == 0;
            (
                state.course_id,
                state.durable_status(),
                state.progress_percent(),
                snapshot,
            )
        }) else {
            return 0;
        };
        if snapshot {
            if let Err(e) = self.write_durable(job_id, course_id, &status, None).await {
                warn!(job_id, course_id, "dropped progress snapshot {}: {}", status, e);
            }
        }
        percent
    }

    /// `processing -> completed` for the content phase.
    pub async fn complete_content(&self, job_id: &str) -> Result<(), StoreError> {
        let Some(course_id) = self.update(job_id, |state| {
            state.phase = JobPhase::Completed;
            state.course_id
        }) else {
            return Ok(());
        };
        self.write_durable(job_id, course_id, "completed", None).await
    }

    pub async fn begin_questions(&self, job_id: &str) -> Result<(), StoreError> {
        self.set_question_status(job_id, QuestionStatus::Processing, None)
            .await
    }

    pub async fn complete_questions(&self, job_id: &str, stored: usize) -> Result<(), StoreError> {
        self.set_question_status(job_id, QuestionStatus::Completed, Some(stored))
            .await
    }

    async fn set_question_status(
        &self,
        job_id: &str,
        question_status: QuestionStatus,
        stored: Option<usize>,
    ) -> Result<(), StoreError> {
        let Some(course_id) = self.update(job_id, |state| {
            state.question_status = Some(question_status);
            if let Some(stored) = stored {
                state.questions_stored = stored;
            }
            state.course_id
        }) else {
            return Ok(());
        };
        self.write_durable(job_id, course_id, "completed", Some(question_status))
            .await
    }

    /// Move the job to its error state. Once the content phase is completed the status
    /// axis stays `completed`; the question phase is closed and the reason kept.
    pub async fn fail(&self, job_id: &str, message: &str) {
        let Some((course_id, status, question_status)) = self.update(job_id, |state| {
            state.error = Some(message.to_string());
            if state.phase == JobPhase::Completed {
                state.question_status = Some(QuestionStatus::Completed);
            } else {
                state.phase = JobPhase::Error;
            }
            (
                state.course_id,
                state.durable_status(),
                state.question_status,
            )
        }) else {
            return;
        };
        if let Err(e) = self
            .write_durable(job_id, course_id, &status, question_status)
            .await
        {
            warn!(job_id, course_id, "could not record job error durably: {}", e);
        }
    }

    /// Drop finished jobs whose last update is older than `ttl`. Durable rows stay.
    pub fn prune_finished(&self, ttl: Duration) -> usize {
        let now = now_utc();
        let before = self.jobs.len();
        self.jobs
            .retain(|_, state| !(state.is_finished() && now - state.updated_at >= ttl));
        before.saturating_sub(self.jobs.len())
    }
}
