use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{GenerationRequest, TextGenerator, clean::clean_json_response, sanitize_prompt_input};
use crate::{error::ProducerError, utils::truncate_text};

const CONTENT_MAX_TOKENS: u32 = 2000;
const DEFAULT_COURSE_NAME: &str = "General Course";
pub const FAILED_HELP_TEXT: &str = "Content generation failed";

/// Text produced for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub content: String,
    pub help_text: String,
    pub links: String,
    pub code: String,
    /// set when neither strategy produced usable text
    pub placeholder: bool,
}

impl GeneratedContent {
    pub fn placeholder(subtitle: &str) -> Self {
        Self {
            content: format!("Error: no usable content was generated for \"{subtitle}\""),
            help_text: FAILED_HELP_TEXT.to_string(),
            links: String::new(),
            code: String::new(),
            placeholder: true,
        }
    }
}

/// Content Producer Adapter.
///
/// Asks for strict JSON first; when nothing parseable comes back it asks again for a
/// line prefixed plain text layout. Only transport failures of both attempts escape.
#[derive(Clone)]
pub struct ContentProducer {
    generator: Arc<dyn TextGenerator>,
}

impl ContentProducer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(
        &self,
        module_title: &str,
        subtitle: &str,
        course_name: &str,
    ) -> Result<GeneratedContent, ProducerError> {
        let prompt = json_prompt(module_title, subtitle, course_name);
        match self
            .generator
            .generate(GenerationRequest::new(prompt, CONTENT_MAX_TOKENS))
            .await
        {
            Ok(text) => {
                if let Some(content) = clean_json_response(&text)
                    .as_ref()
                    .and_then(|v| content_from_json(v, subtitle))
                {
                    debug!("parsed json content for subtitle '{}'", subtitle);
                    return Ok(content);
                }
                warn!(
                    "json parsing failed for subtitle '{}', raw: {}",
                    subtitle,
                    truncate_text(&text, 200)
                );
            }
            Err(e) => warn!("content request failed for subtitle '{}': {}", subtitle, e),
        }
        self.generate_fallback(module_title, subtitle).await
    }

    async fn generate_fallback(
        &self,
        module_title: &str,
        subtitle: &str,
    ) -> Result<GeneratedContent, ProducerError> {
        let prompt = structured_prompt(module_title, subtitle);
        let text = self
            .generator
            .generate(GenerationRequest::new(prompt, CONTENT_MAX_TOKENS))
            .await?;
        match parse_structured_text(&text, subtitle) {
            Some(content) => Ok(content),
            None => {
                warn!(
                    "fallback output for subtitle '{}' is unusable, storing placeholder",
                    subtitle
                );
                Ok(GeneratedContent::placeholder(subtitle))
            }
        }
    }
}

fn json_prompt(module_title: &str, subtitle: &str, course_name: &str) -> String {
    let subtitle = sanitize_prompt_input(subtitle);
    let module_title = sanitize_prompt_input(module_title);
    let course_name = if course_name.trim().is_empty() {
        DEFAULT_COURSE_NAME.to_string()
    } else {
        sanitize_prompt_input(course_name)
    };
    format!(
        "Generate comprehensive educational content for the subtitle \"{subtitle}\" under the master topic \"{module_title}\".\n\n\
        Course Context: {course_name}\n\n\
        Requirements:\n\
        1. Generate detailed \"subtitle_content\" that covers the topic comprehensively\n\
        2. Create helpful \"subtitle_help_text\" that provides guidance and tips\n\
        3. Provide relevant \"helpful_links\" for further learning\n\
        4. If the topic is technical, add a short illustrative \"subtitle_code\" sample, otherwise leave it empty\n\n\
        The response should be in this exact JSON format:\n\
        {{\n\
            \"subtitle_content\": \"Comprehensive educational content covering the topic in detail...\",\n\
            \"subtitle_help_text\": \"Helpful guidance and tips for understanding this topic...\",\n\
            \"helpful_links\": \"https://example1.com,https://example2.com,https://example3.com\",\n\
            \"subtitle_code\": \"\"\n\
        }}\n\n\
        Guidelines:\n\
        - helpful_links should include 3-5 relevant, high-quality resources\n\
        - Make content practical and industry-relevant, with real-world examples\n\
        - Use proper JSON escaping for quotes and special characters\n\
        - Return only clean JSON without markdown formatting"
    )
}

fn structured_prompt(module_title: &str, subtitle: &str) -> String {
    let subtitle = sanitize_prompt_input(subtitle);
    let module_title = sanitize_prompt_input(module_title);
    format!(
        "Generate educational content for \"{subtitle}\" under \"{module_title}\".\n\n\
        Provide the content in this exact format (no JSON, no markdown):\n\n\
        Content: [Detailed educational content here]\n\n\
        Help Text: [Helpful guidance and tips here]\n\n\
        Links: [Comma-separated URLs here]"
    )
}

fn text_field(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| match value {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                (!parts.is_empty()).then(|| parts.join(","))
            }
            _ => None,
        })
}

fn content_from_json(value: &Value, subtitle: &str) -> Option<GeneratedContent> {
    let object = match value {
        Value::Object(object) => object,
        Value::Array(items) => items.iter().find_map(Value::as_object)?,
        _ => return None,
    };
    let content = text_field(object, &["subtitle_content", "content"])?;
    if content.is_empty() {
        return None;
    }
    let help_text = text_field(object, &["subtitle_help_text", "help_text"])
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("Help text for {subtitle}"));
    Some(GeneratedContent {
        content,
        help_text,
        links: text_field(object, &["helpful_links", "links"]).unwrap_or_default(),
        code: text_field(object, &["subtitle_code", "code"]).unwrap_or_default(),
        placeholder: false,
    })
}

#[derive(Clone, Copy)]
enum Section {
    Content,
    HelpText,
    Links,
}

/// Parse the `Content: / Help Text: / Links:` layout. Continuation lines belong to the
/// section opened last.
fn parse_structured_text(text: &str, subtitle: &str) -> Option<GeneratedContent> {
    let mut content = Vec::new();
    let mut help_text = Vec::new();
    let mut links = Vec::new();
    let mut section = None;
    for line in text.lines() {
        let line = line.trim().trim_start_matches(['*', '#']).trim();
        let (next, rest) = if let Some(rest) = strip_label(line, "Content:") {
            (Some(Section::Content), rest)
        } else if let Some(rest) = strip_label(line, "Help Text:") {
            (Some(Section::HelpText), rest)
        } else if let Some(rest) = strip_label(line, "Links:") {
            (Some(Section::Links), rest)
        } else {
            (section, line)
        };
        section = next;
        let rest = rest.trim_start_matches('*').trim();
        if rest.is_empty() {
            continue;
        }
        match section {
            Some(Section::Content) => content.push(rest),
            Some(Section::HelpText) => help_text.push(rest),
            Some(Section::Links) => links.push(rest),
            None => {}
        }
    }
    if content.is_empty() && help_text.is_empty() {
        return None;
    }
    let content = if content.is_empty() {
        format!("Content for {subtitle}")
    } else {
        content.join("\n")
    };
    let help_text = if help_text.is_empty() {
        format!("Help text for {subtitle}")
    } else {
        help_text.join("\n")
    };
    Some(GeneratedContent {
        content,
        help_text,
        links: links.join(","),
        code: String::new(),
        placeholder: false,
    })
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    head.eq_ignore_ascii_case(label)
        .then(|| &line[label.len()..])
}
