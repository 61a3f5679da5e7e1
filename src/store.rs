pub mod sqlite;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    error::StoreError,
    producer::Question,
    progress::{ContentItem, QuestionStatus},
};

/// Durable progress record of one job, keyed by `(course_id, job_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProgressRow {
    pub course_id: i64,
    pub job_id: String,
    pub status: String,
    pub question_status: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_date: OffsetDateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate<'a> {
    pub course_id: i64,
    pub job_id: &'a str,
    pub status: &'a str,
    /// `None` leaves a previously stored question status untouched
    pub question_status: Option<QuestionStatus>,
}

/// A persisted content row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentRow {
    pub content_id: i64,
    pub course_id: i64,
    pub module_id: i64,
    pub module_title: String,
    pub subtitle_id: i64,
    pub subtitle: String,
    pub content: String,
    pub code: String,
    pub help_text: String,
    pub links: String,
}

/// Relational store the pipeline writes content, questions and progress to.
pub trait CourseStore: Send + Sync {
    /// Append a content row and return its id. Never updates an existing row.
    fn insert_content<'a>(
        &'a self,
        course_id: i64,
        item: &'a ContentItem,
    ) -> BoxFuture<'a, Result<i64, StoreError>>;

    fn insert_question<'a>(
        &'a self,
        course_id: i64,
        question: &'a Question,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn upsert_progress<'a>(&'a self, update: ProgressUpdate<'a>)
    -> BoxFuture<'a, Result<(), StoreError>>;

    /// Most recently updated progress row of the course.
    fn latest_progress(&self, course_id: i64)
    -> BoxFuture<'_, Result<Option<ProgressRow>, StoreError>>;

    /// Content rows ordered by module id, subtitle id, then insertion.
    fn course_content(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<ContentRow>, StoreError>>;

    /// Stored questions ordered by sequence id.
    fn course_questions(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<Question>, StoreError>>;

    /// Progress rows that are completed or still processing, newest first.
    fn pending_progress(&self) -> BoxFuture<'_, Result<Vec<ProgressRow>, StoreError>>;
}
