use std::str::FromStr;

use futures::{FutureExt, future::BoxFuture};
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use tracing::info;

use super::{ContentRow, CourseStore, ProgressRow, ProgressUpdate};
use crate::{error::StoreError, producer::Question, progress::ContentItem, utils::now_utc};

const SCHEMA: &[&str] = &[
    r#"create table if not exists course_content (
        content_id integer primary key autoincrement,
        course_id integer not null,
        module_id integer not null,
        module_title text not null,
        subtitle_id integer not null,
        subtitle text not null,
        content text not null,
        code text not null default '',
        help_text text not null default '',
        links text not null default '',
        created_date text not null
    )"#,
    r#"create index if not exists course_content_course
        on course_content (course_id, module_id, subtitle_id)"#,
    r#"create table if not exists course_content_progress (
        course_id integer not null,
        job_id text not null,
        status text not null,
        question_status text,
        updated_date text not null,
        primary key (course_id, job_id)
    )"#,
    r#"create table if not exists course_assessment (
        id integer primary key autoincrement,
        course_id integer not null,
        sequence_id integer not null,
        question text not null,
        options text not null,
        answer text not null,
        answer_id integer not null
    )"#,
];

/// [`CourseStore`] over a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pub database: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url`, creating the database file and the tables when missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool_options = if is_memory_url(url) {
            // every new connection would open a fresh empty database
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };
        let database = pool_options.connect_with(options).await?;
        let store = Self { database };
        store.ensure_schema().await?;
        info!("course database ready at {}", url);
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.database).await?;
        }
        Ok(())
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn progress_from_row(row: &SqliteRow) -> Result<ProgressRow, sqlx::Error> {
    Ok(ProgressRow {
        course_id: row.try_get("course_id")?,
        job_id: row.try_get("job_id")?,
        status: row.try_get("status")?,
        question_status: row.try_get("question_status")?,
        updated_date: row.try_get("updated_date")?,
    })
}

fn content_from_row(row: &SqliteRow) -> Result<ContentRow, sqlx::Error> {
    Ok(ContentRow {
        content_id: row.try_get("content_id")?,
        course_id: row.try_get("course_id")?,
        module_id: row.try_get("module_id")?,
        module_title: row.try_get("module_title")?,
        subtitle_id: row.try_get("subtitle_id")?,
        subtitle: row.try_get("subtitle")?,
        content: row.try_get("content")?,
        code: row.try_get("code")?,
        help_text: row.try_get("help_text")?,
        links: row.try_get("links")?,
    })
}

fn question_from_row(row: &SqliteRow) -> Result<Question, StoreError> {
    let options: String = row.try_get("options")?;
    Ok(Question {
        sequence_id: row.try_get("sequence_id")?,
        question: row.try_get("question")?,
        options: serde_json::from_str(&options)?,
        answer: row.try_get("answer")?,
        answer_id: row.try_get("answer_id")?,
    })
}

impl CourseStore for SqliteStore {
    fn insert_content<'a>(
        &'a self,
        course_id: i64,
        item: &'a ContentItem,
    ) -> BoxFuture<'a, Result<i64, StoreError>> {
        async move {
            let content_id = sqlx::query(
                r#"insert into course_content
                    (course_id, module_id, module_title, subtitle_id, subtitle, content, code, help_text, links, created_date)
                    values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(course_id)
            .bind(item.module_id)
            .bind(&item.module_title)
            .bind(item.subtitle_id)
            .bind(&item.subtitle)
            .bind(&item.content)
            .bind(&item.code)
            .bind(&item.help_text)
            .bind(&item.links)
            .bind(now_utc())
            .execute(&self.database)
            .await?
            .last_insert_rowid();
            Ok(content_id)
        }
        .boxed()
    }

    fn insert_question<'a>(
        &'a self,
        course_id: i64,
        question: &'a Question,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let options = serde_json::to_string(&question.options)?;
            sqlx::query(
                r#"insert into course_assessment
                    (course_id, sequence_id, question, options, answer, answer_id)
                    values (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(course_id)
            .bind(question.sequence_id)
            .bind(&question.question)
            .bind(options)
            .bind(&question.answer)
            .bind(question.answer_id)
            .execute(&self.database)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn upsert_progress<'a>(
        &'a self,
        update: ProgressUpdate<'a>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            sqlx::query(
                r#"insert into course_content_progress (course_id, job_id, status, question_status, updated_date)
                    values (?, ?, ?, ?, ?)
                    on conflict (course_id, job_id) do update set
                        status = excluded.status,
                        question_status = coalesce(excluded.question_status, course_content_progress.question_status),
                        updated_date = excluded.updated_date"#,
            )
            .bind(update.course_id)
            .bind(update.job_id)
            .bind(update.status)
            .bind(update.question_status.map(|s| s.as_str()))
            .bind(now_utc())
            .execute(&self.database)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn latest_progress(
        &self,
        course_id: i64,
    ) -> BoxFuture<'_, Result<Option<ProgressRow>, StoreError>> {
        async move {
            let row = sqlx::query(
                r#"select course_id, job_id, status, question_status, updated_date
                    from course_content_progress where course_id = ?
                    order by updated_date desc, rowid desc limit 1"#,
            )
            .bind(course_id)
            .fetch_optional(&self.database)
            .await?;
            Ok(row.as_ref().map(progress_from_row).transpose()?)
        }
        .boxed()
    }

    fn course_content(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<ContentRow>, StoreError>> {
        async move {
            let rows = sqlx::query(
                r#"select content_id, course_id, module_id, module_title, subtitle_id, subtitle, content, code, help_text, links
                    from course_content where course_id = ?
                    order by module_id, subtitle_id, content_id"#,
            )
            .bind(course_id)
            .fetch_all(&self.database)
            .await?;
            Ok(rows
                .iter()
                .map(content_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        }
        .boxed()
    }

    fn course_questions(&self, course_id: i64) -> BoxFuture<'_, Result<Vec<Question>, StoreError>> {
        async move {
            let rows = sqlx::query(
                r#"select sequence_id, question, options, answer, answer_id
                    from course_assessment where course_id = ?
                    order by sequence_id, id"#,
            )
            .bind(course_id)
            .fetch_all(&self.database)
            .await?;
            rows.iter().map(question_from_row).collect()
        }
        .boxed()
    }

    fn pending_progress(&self) -> BoxFuture<'_, Result<Vec<ProgressRow>, StoreError>> {
        async move {
            let rows = sqlx::query(
                r#"select course_id, job_id, status, question_status, updated_date
                    from course_content_progress
                    where status = 'completed' or status like 'processing%'
                    order by updated_date desc, rowid desc"#,
            )
            .fetch_all(&self.database)
            .await?;
            Ok(rows
                .iter()
                .map(progress_from_row)
                .collect::<Result<Vec<_>, _>>()?)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::QuestionStatus;

    fn item(module_id: i64, subtitle_id: i64, content: &str) -> ContentItem {
        ContentItem {
            module_id,
            module_title: format!("Module {module_id}"),
            subtitle_id,
            subtitle: format!("Topic {module_id}.{subtitle_id}"),
            content: content.to_string(),
            help_text: "help".to_string(),
            links: "https://a.dev".to_string(),
            code: String::new(),
            content_id: None,
            placeholder: false,
        }
    }

    fn update<'a>(job_id: &'a str, status: &'a str, question_status: Option<QuestionStatus>) -> ProgressUpdate<'a> {
        ProgressUpdate {
            course_id: 7,
            job_id,
            status,
            question_status,
        }
    }

    #[tokio::test]
    async fn content_is_returned_in_outline_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store.insert_content(7, &item(2, 1, "late")).await.unwrap();
        let second = store.insert_content(7, &item(1, 2, "middle")).await.unwrap();
        store.insert_content(7, &item(1, 1, "early")).await.unwrap();
        store.insert_content(8, &item(1, 1, "other course")).await.unwrap();
        assert!(second > first);

        let rows = store.course_content(7).await.unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, ["early", "middle", "late"]);
        assert_eq!(rows[2].module_title, "Module 2");
        assert_eq!(rows[2].content_id, first);
    }

    #[tokio::test]
    async fn repeated_inserts_append_rows() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_content(7, &item(1, 1, "run one")).await.unwrap();
        store.insert_content(7, &item(1, 1, "run two")).await.unwrap();
        assert_eq!(store.course_content(7).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_job_and_question_status() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_progress(update("job-a", "processing", None)).await.unwrap();
        store
            .upsert_progress(update("job-a", "completed", Some(QuestionStatus::Processing)))
            .await
            .unwrap();
        // a later write without question status keeps the stored one
        store.upsert_progress(update("job-a", "completed", None)).await.unwrap();

        let row = store.latest_progress(7).await.unwrap().unwrap();
        assert_eq!(row.job_id, "job-a");
        assert_eq!(row.status, "completed");
        assert_eq!(row.question_status.as_deref(), Some("processing"));
        assert_eq!(store.pending_progress().await.unwrap().len(), 1);
        assert!(store.latest_progress(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_progress_prefers_most_recent_job() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_progress(update("job-a", "completed", None)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.upsert_progress(update("job-b", "processing_40%", None)).await.unwrap();
        let row = store.latest_progress(7).await.unwrap().unwrap();
        assert_eq!(row.job_id, "job-b");
        assert_eq!(row.status, "processing_40%");
    }

    #[tokio::test]
    async fn pending_lists_completed_and_processing_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_progress(update("job-a", "completed", None)).await.unwrap();
        store.upsert_progress(update("job-b", "processing_20%", None)).await.unwrap();
        store.upsert_progress(update("job-c", "error: store down", None)).await.unwrap();
        store.upsert_progress(update("job-d", "starting", None)).await.unwrap();
        let mut jobs: Vec<_> = store
            .pending_progress()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.job_id)
            .collect();
        jobs.sort();
        assert_eq!(jobs, ["job-a", "job-b"]);
    }

    #[tokio::test]
    async fn questions_round_trip_in_sequence_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        for sequence_id in [2, 1] {
            let question = Question {
                sequence_id,
                question: format!("Q{sequence_id}"),
                options: vec!["a".into(), "b \"quoted\"".into(), "c".into(), "d".into()],
                answer: "b \"quoted\"".to_string(),
                answer_id: 2,
            };
            store.insert_question(3, &question).await.unwrap();
        }
        let questions = store.course_questions(3).await.unwrap();
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question, "Q1");
        assert!(questions[1].is_consistent());
        assert!(store.course_questions(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn durable_rows_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("course.db").display());
        {
            let store = SqliteStore::connect(&url).await.unwrap();
            store.insert_content(7, &item(1, 1, "kept")).await.unwrap();
            store
                .upsert_progress(update("job-a", "processing_50%", None))
                .await
                .unwrap();
            store.database.close().await;
        }
        let store = SqliteStore::connect(&url).await.unwrap();
        let row = store.latest_progress(7).await.unwrap().unwrap();
        assert_eq!(row.status, "processing_50%");
        assert_eq!(store.course_content(7).await.unwrap()[0].content, "kept");
    }
}
