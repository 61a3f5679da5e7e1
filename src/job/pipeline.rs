use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use crate::{
    config::PipelineConfig,
    error::{Error, Result},
    outline::Outline,
    producer::{ContentProducer, QuestionProducer, TextGenerator, question::QuestionSettings},
    progress::{ContentItem, ProgressStore},
    store::CourseStore,
};

/// Everything one run needs, owned by the spawned task.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: String,
    pub course_id: i64,
    pub course_name: String,
    pub outline: Outline,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSettings {
    /// pause between two consecutive leaves
    pub leaf_delay: Duration,
    pub max_job_duration: Option<Duration>,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            leaf_delay: config.leaf_delay(),
            max_job_duration: config.max_job_duration(),
        }
    }
}

impl From<&PipelineConfig> for QuestionSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_questions: config.max_questions,
            questions_per_batch: config.questions_per_batch,
            max_context_chars: config.max_context_chars,
        }
    }
}

/// Job Orchestrator: walks the outline leaf by leaf, then builds the question bank.
#[derive(Clone)]
pub struct Pipeline {
    content: ContentProducer,
    questions: QuestionProducer,
    store: Arc<dyn CourseStore>,
    progress: Arc<ProgressStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        progress: Arc<ProgressStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self::with_settings(generator, progress, config.into(), config.into())
    }

    pub fn with_settings(
        generator: Arc<dyn TextGenerator>,
        progress: Arc<ProgressStore>,
        settings: PipelineSettings,
        question_settings: QuestionSettings,
    ) -> Self {
        Self {
            content: ContentProducer::new(generator.clone()),
            questions: QuestionProducer::new(generator, question_settings),
            store: progress.durable().clone(),
            progress,
            settings,
        }
    }

    /// Run the job to a terminal state. Fatal errors are recorded, never returned.
    pub async fn run(&self, job: JobSpec) {
        let result = match self.settings.max_job_duration {
            Some(limit) => tokio::time::timeout(limit, self.execute(&job))
                .await
                .unwrap_or(Err(Error::TimedOut(limit))),
            None => self.execute(&job).await,
        };
        match result {
            Ok(()) => info!(job_id = %job.job_id, course_id = job.course_id, "job finished"),
            Err(e) => {
                error!(job_id = %job.job_id, course_id = job.course_id, "job failed: {}", e);
                self.progress.fail(&job.job_id, &e.to_string()).await;
            }
        }
    }

    async fn execute(&self, job: &JobSpec) -> Result<()> {
        job.outline.validate()?;
        let total_items = job.outline.total_items();
        self.progress.begin(&job.job_id, total_items).await?;
        info!(
            job_id = %job.job_id,
            course_id = job.course_id,
            "generating content for {} leaves of '{}'",
            total_items,
            job.course_name
        );

        let mut corpus = Vec::with_capacity(total_items);
        for (idx, leaf) in job.outline.leaves().enumerate() {
            if idx > 0 && !self.settings.leaf_delay.is_zero() {
                tokio::time::sleep(self.settings.leaf_delay).await;
            }
            let mut item = match self
                .content
                .generate(leaf.module_title, leaf.subtitle, &job.course_name)
                .await
            {
                Ok(generated) => ContentItem::generated(&leaf, generated),
                Err(e) => {
                    warn!(
                        job_id = %job.job_id,
                        "leaf {}.{} '{}' failed: {}",
                        leaf.module_id,
                        leaf.subtitle_id,
                        leaf.subtitle,
                        e
                    );
                    ContentItem::failed(&leaf, &e)
                }
            };
            if item.placeholder {
                warn!(
                    job_id = %job.job_id,
                    "leaf {}.{} recorded as placeholder",
                    leaf.module_id,
                    leaf.subtitle_id
                );
            } else {
                item.content_id = Some(self.store.insert_content(job.course_id, &item).await?);
                corpus.push(item.content.clone());
            }
            let percent = self.progress.record_leaf(&job.job_id, item).await;
            debug!(
                job_id = %job.job_id,
                "leaf {}.{} done, {}%",
                leaf.module_id,
                leaf.subtitle_id,
                percent
            );
        }

        self.progress.complete_content(&job.job_id).await?;
        info!(job_id = %job.job_id, course_id = job.course_id, "content phase completed");
        self.build_question_bank(job, &corpus.join("\n\n")).await;
        Ok(())
    }

    /// The status axis is already `completed` here, so durable write failures are
    /// logged and skipped.
    async fn build_question_bank(&self, job: &JobSpec, corpus: &str) {
        if let Err(e) = self.progress.begin_questions(&job.job_id).await {
            warn!(job_id = %job.job_id, "could not record question phase start: {}", e);
        }
        let questions = self.questions.generate(corpus, &job.course_name).await;
        let mut stored = 0;
        for question in &questions {
            match self.store.insert_question(job.course_id, question).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(
                    job_id = %job.job_id,
                    "skipping question {}: {}",
                    question.sequence_id,
                    e
                ),
            }
        }
        if let Err(e) = self.progress.complete_questions(&job.job_id, stored).await {
            warn!(job_id = %job.job_id, "could not record question phase end: {}", e);
        }
        info!(
            job_id = %job.job_id,
            course_id = job.course_id,
            "question bank stored: {} of {}",
            stored,
            questions.len()
        );
    }
}
