//! Scripted collaborators shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    error::{ProducerError, StoreError},
    producer::{GenerationRequest, Question, TextGenerator},
    progress::ContentItem,
    store::{ContentRow, CourseStore, ProgressRow, ProgressUpdate, sqlite::SqliteStore},
};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<String, ProducerError> + Send + Sync>;

pub struct ScriptedGenerator {
    responder: Responder,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn always(
        responder: impl Fn(&GenerationRequest) -> Result<String, ProducerError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Replies in order, then answers every further call with `EmptyResponse`.
    pub fn replying(
        replies: impl IntoIterator<Item = Result<String, ProducerError>>,
    ) -> Arc<Self> {
        let replies = Mutex::new(replies.into_iter().collect::<VecDeque<_>>());
        Self::always(move |_| {
            replies
                .lock()
                .pop_front()
                .unwrap_or(Err(ProducerError::EmptyResponse))
        })
    }

    /// A well formed json content reply for every leaf and an empty question batch.
    pub fn content_json() -> Arc<Self> {
        Self::always(|request| {
            if request.prompt.contains("multiple-choice") {
                return Ok("[]".to_string());
            }
            Ok(serde_json::json!({
                "subtitle_content": format!("Generated for: {}", first_quoted(&request.prompt)),
                "subtitle_help_text": "tips",
                "helpful_links": "https://example.org",
            })
            .to_string())
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

fn first_quoted(prompt: &str) -> &str {
    prompt.split('"').nth(1).unwrap_or_default()
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String, ProducerError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        let reply = (self.responder)(&request);
        async move { reply }.boxed()
    }
}

/// SQLite backed store whose individual operations can be switched to fail.
pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_content: AtomicBool,
    pub fail_questions: AtomicBool,
    pub fail_progress: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            fail_content: AtomicBool::new(false),
            fail_questions: AtomicBool::new(false),
            fail_progress: AtomicBool::new(false),
        })
    }
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

impl CourseStore for FlakyStore {
    fn insert_content<'a>(
        &'a self,
        course_id: i64,
        item: &'a ContentItem,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        if self.fail_content.load(Ordering::SeqCst) {
            return async { Err(unavailable()) }.boxed();
        }
        self.inner.insert_content(course_id, item)
    }

    fn insert_question<'a>(
        &'a self,
        course_id: i64,
        question: &'a Question,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        if self.fail_questions.load(Ordering::SeqCst) {
            return async { Err(unavailable()) }.boxed();
        }
        self.inner.insert_question(course_id, question)
    }

    fn upsert_progress<'a>(
        &'a self,
        update: ProgressUpdate<'a>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        if self.fail_progress.load(Ordering::SeqCst) {
            return async { Err(unavailable()) }.boxed();
        }
        self.inner.upsert_progress(update)
    }

    fn latest_progress(&self, course_id: i64) -> BoxFuture<'_, Result<Option<ProgressRow>, StoreError>> {
        self.inner.latest_progress(course_id)
    }

    fn course_content(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<ContentRow>, StoreError>> {
        self.inner.course_content(course_id)
    }

    fn course_questions(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<Question>, StoreError>> {
        self.inner.course_questions(course_id)
    }

    fn pending_progress(&self) -> BoxFuture<'_, Result<Vec<ProgressRow>, StoreError>> {
        self.inner.pending_progress()
    }
}

/// Never answers, for exercising ceilings and deadlines.
pub struct StalledGenerator;

impl TextGenerator for StalledGenerator {
    fn generate(&self, _request: GenerationRequest) -> BoxFuture<'_, Result<String, ProducerError>> {
        futures::future::pending().boxed()
    }
}
