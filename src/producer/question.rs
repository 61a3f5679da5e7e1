use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::{GenerationRequest, TextGenerator, clean::clean_json_response, sanitize_prompt_input};

const QUESTION_MAX_TOKENS: u32 = 4000;

/// One multiple choice question of a course assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    /// 1-based position in the merged question bank
    pub sequence_id: i64,
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
    /// 1-based index into `options`
    pub answer_id: i64,
}

impl Question {
    /// Whether `answer_id` points into `options` at an option equal to `answer`.
    pub fn is_consistent(&self) -> bool {
        usize::try_from(self.answer_id)
            .ok()
            .and_then(|idx| idx.checked_sub(1))
            .and_then(|idx| self.options.get(idx))
            .is_some_and(|option| option.trim() == self.answer.trim())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuestionSettings {
    pub max_questions: usize,
    pub questions_per_batch: usize,
    pub max_context_chars: usize,
}

impl Default for QuestionSettings {
    fn default() -> Self {
        Self {
            max_questions: 20,
            questions_per_batch: 10,
            max_context_chars: 60_000,
        }
    }
}

/// Question Producer Adapter: a context grounded batch followed by a generic
/// "commonly asked" batch, merged and capped.
#[derive(Clone)]
pub struct QuestionProducer {
    generator: Arc<dyn TextGenerator>,
    settings: QuestionSettings,
}

impl QuestionProducer {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: QuestionSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub async fn generate(&self, corpus: &str, course_name: &str) -> Vec<Question> {
        let course_name = sanitize_prompt_input(course_name);
        let contextual = self.contextual_prompt(corpus, &course_name);
        let common = self.common_prompt(&course_name);
        let (contextual, common) = tokio::join!(
            self.batch("contextual", contextual),
            self.batch("commonly asked", common)
        );
        info!(
            "question batches for '{}': {} contextual, {} commonly asked",
            course_name,
            contextual.len(),
            common.len()
        );
        merge_batches(contextual, common, self.settings.max_questions)
    }

    async fn batch(&self, label: &str, prompt: String) -> Vec<RawQuestion> {
        let text = match self
            .generator
            .generate(GenerationRequest::new(prompt, QUESTION_MAX_TOKENS))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("{} question request failed: {}", label, e);
                return Vec::new();
            }
        };
        match clean_json_response(&text).as_ref().and_then(question_list) {
            Some(items) => items.iter().filter_map(RawQuestion::from_value).collect(),
            None => {
                warn!("{} question response holds no json array", label);
                Vec::new()
            }
        }
    }

    fn contextual_prompt(&self, corpus: &str, course_name: &str) -> String {
        let context: String = corpus.chars().take(self.settings.max_context_chars).collect();
        format!(
            "Based on the following course content for '{course_name}', generate {count} high-standard multiple-choice questions. \
            Each question should have 4 options, and specify the correct answer and its index (1-based). \
            Return as JSON array with fields: question, options (array), answer, answer_id (1-4).\n\n\
            Content:\n{context}\n\n\
            Format:\n\
            [{{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"answer\": \"...\", \"answer_id\": 2}}, ...]",
            count = self.settings.questions_per_batch,
        )
    }

    fn common_prompt(&self, course_name: &str) -> String {
        format!(
            "Generate {count} high-standard multiple-choice questions that are most commonly asked by companies for '{course_name}'. \
            Each question should have 4 options, and specify the correct answer and its index (1-based). \
            Return as JSON array with fields: question, options (array), answer, answer_id (1-4).\n\n\
            Format:\n\
            [{{\"question\": \"...\", \"options\": [\"A\", \"B\", \"C\", \"D\"], \"answer\": \"...\", \"answer_id\": 2}}, ...]",
            count = self.settings.questions_per_batch,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    answer: String,
    answer_id: i64,
}

impl RawQuestion {
    /// Lenient decoding: numbers may arrive as strings, options as any scalars.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let question = object.get("question")?.as_str()?.trim().to_string();
        if question.is_empty() {
            return None;
        }
        let options = object
            .get("options")?
            .as_array()?
            .iter()
            .map(|option| match option {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let answer = match object.get("answer") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let answer_id = match object.get("answer_id") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        };
        Some(Self {
            question,
            options,
            answer,
            answer_id,
        })
    }
}

/// The question list of a reply: a bare array, or the first array-valued field of
/// a wrapping object such as `{"questions": [...]}`.
fn question_list(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(fields) => fields.values().find_map(Value::as_array),
        _ => None,
    }
}

fn merge_batches(first: Vec<RawQuestion>, second: Vec<RawQuestion>, max: usize) -> Vec<Question> {
    first
        .into_iter()
        .chain(second)
        .take(max)
        .zip(1..)
        .map(|(raw, sequence_id)| {
            let question = Question {
                sequence_id,
                question: raw.question,
                options: raw.options,
                answer: raw.answer,
                answer_id: raw.answer_id,
            };
            if !question.is_consistent() {
                warn!(
                    "question {} has an answer_id that does not match its options",
                    sequence_id
                );
            }
            question
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ProducerError, testing::ScriptedGenerator};

    fn batch_json(prefix: &str, count: usize) -> String {
        let items: Vec<Value> = (1..=count)
            .map(|i| {
                serde_json::json!({
                    "question": format!("{prefix} question {i}"),
                    "options": ["alpha", "beta", "gamma", "delta"],
                    "answer": "beta",
                    "answer_id": 2,
                })
            })
            .collect();
        format!("```json\n{}\n```", Value::Array(items))
    }

    /// Answers by prompt kind so the outcome does not depend on join ordering.
    fn by_kind(
        contextual: Result<String, ProducerError>,
        common: Result<String, ProducerError>,
    ) -> Arc<ScriptedGenerator> {
        let contextual = parking_lot::Mutex::new(Some(contextual));
        let common = parking_lot::Mutex::new(Some(common));
        ScriptedGenerator::always(move |request| {
            let slot = if request.prompt.contains("Based on the following course content") {
                &contextual
            } else {
                &common
            };
            slot.lock()
                .take()
                .unwrap_or_else(|| Err(ProducerError::EmptyResponse))
        })
    }

    #[tokio::test]
    async fn unparsable_second_batch_contributes_nothing() {
        let generator = by_kind(
            Ok(batch_json("context", 12)),
            Ok("Sorry, I can't help with that.".to_string()),
        );
        let producer = QuestionProducer::new(generator.clone(), QuestionSettings::default());
        let questions = producer.generate("Variables hold values.", "Python").await;
        assert_eq!(questions.len(), 12);
        assert_eq!(
            questions.iter().map(|q| q.sequence_id).collect::<Vec<_>>(),
            (1..=12).collect::<Vec<_>>()
        );
        assert!(questions.iter().all(Question::is_consistent));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn wrapped_batches_keep_their_questions() {
        let wrapped = r#"```json
{"questions": [{"question": "Q1", "options": ["a", "b", "c", "d"], "answer": "b", "answer_id": 2}]}
```"#;
        let generator = by_kind(Ok(wrapped.to_string()), Ok(wrapped.to_string()));
        let producer = QuestionProducer::new(generator, QuestionSettings::default());
        let questions = producer.generate("corpus", "Python").await;
        assert_eq!(questions.len(), 2);
        assert_eq!(
            questions.iter().map(|q| q.sequence_id).collect::<Vec<_>>(),
            [1, 2]
        );
        assert!(questions.iter().all(Question::is_consistent));
    }

    #[test]
    fn object_without_array_has_no_question_list() {
        assert_eq!(question_list(&serde_json::json!({"question": "Q1"})), None);
        assert_eq!(question_list(&serde_json::json!("text")), None);
        assert_eq!(
            question_list(&serde_json::json!({"note": "x", "items": [1]})).map(Vec::len),
            Some(1)
        );
    }

    #[tokio::test]
    async fn merges_contextual_first_and_caps_at_max() {
        let generator = by_kind(Ok(batch_json("context", 15)), Ok(batch_json("common", 15)));
        let producer = QuestionProducer::new(generator, QuestionSettings::default());
        let questions = producer.generate("corpus", "Rust").await;
        assert_eq!(questions.len(), 20);
        assert_eq!(questions[0].question, "context question 1");
        assert_eq!(questions[14].question, "context question 15");
        assert_eq!(questions[15].question, "common question 1");
        assert_eq!(questions[15].sequence_id, 16);
        assert_eq!(questions[19].sequence_id, 20);
    }

    #[tokio::test]
    async fn failed_request_does_not_abort_other_batch() {
        let generator = by_kind(
            Err(ProducerError::Unreachable("timeout".to_string())),
            Ok(batch_json("common", 3)),
        );
        let producer = QuestionProducer::new(generator, QuestionSettings::default());
        let questions = producer.generate("corpus", "Go").await;
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[0].question, "common question 1");
        assert_eq!(questions[0].sequence_id, 1);
    }

    #[tokio::test]
    async fn corpus_is_truncated_in_prompt() {
        let generator = by_kind(Ok("[]".to_string()), Ok("[]".to_string()));
        let settings = QuestionSettings {
            max_context_chars: 10,
            ..QuestionSettings::default()
        };
        let producer = QuestionProducer::new(generator.clone(), settings);
        let questions = producer.generate(&"x".repeat(50), "C").await;
        assert!(questions.is_empty());
        let contextual = generator
            .prompts()
            .into_iter()
            .find(|p| p.contains("Content:"))
            .unwrap();
        assert!(contextual.contains(&format!("Content:\n{}\n", "x".repeat(10))));
        assert!(!contextual.contains(&"x".repeat(11)));
    }

    #[test]
    fn lenient_decoding_keeps_inconsistent_items() {
        let value = serde_json::json!([
            {"question": "Q1", "options": ["1", "2", "3", "4"], "answer": "3", "answer_id": "3"},
            {"question": "Q2", "options": [1, 2, 3, 4], "answer": 9, "answer_id": 7},
            {"question": "", "options": []},
            {"options": ["missing question"]},
            "not an object"
        ]);
        let raw: Vec<RawQuestion> = value
            .as_array()
            .unwrap()
            .iter()
            .filter_map(RawQuestion::from_value)
            .collect();
        assert_eq!(raw.len(), 2);
        let merged = merge_batches(raw, Vec::new(), 20);
        assert!(merged[0].is_consistent());
        assert_eq!(merged[1].options, vec!["1", "2", "3", "4"]);
        assert!(!merged[1].is_consistent());
        assert_eq!(merged[1].sequence_id, 2);
    }
}
