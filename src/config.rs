use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// sqlx connection url of the course database
    pub database: String,
    /// directory for daily rotated log files, stdout if unset
    pub log_dir: Option<PathBuf>,
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "sqlite://database/course.db".to_string(),
            log_dir: None,
            server: ServerConfig::default(),
            ai: AiConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// OpenAI compatible chat completion endpoint
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            temperature: 0.4,
            top_p: 0.8,
            request_timeout_secs: 120,
        }
    }
}

// keep the api key out of logs
impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl AiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// pause between two leaves, courtesy towards the generation service
    pub leaf_delay_ms: u64,
    /// write a durable progress snapshot every n leaves
    pub snapshot_every: usize,
    pub max_concurrent_jobs: usize,
    pub max_questions: usize,
    pub questions_per_batch: usize,
    /// upper bound of the content corpus handed to question generation
    pub max_context_chars: usize,
    pub max_job_duration_secs: Option<u64>,
    pub finished_job_ttl_secs: u64,
    pub worker_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            leaf_delay_ms: 1000,
            snapshot_every: 1,
            max_concurrent_jobs: 4,
            max_questions: 20,
            questions_per_batch: 10,
            max_context_chars: 60_000,
            max_job_duration_secs: None,
            finished_job_ttl_secs: 3600,
            worker_id: None,
        }
    }
}

impl PipelineConfig {
    pub fn leaf_delay(&self) -> Duration {
        Duration::from_millis(self.leaf_delay_ms)
    }

    pub fn max_job_duration(&self) -> Option<Duration> {
        self.max_job_duration_secs.map(Duration::from_secs)
    }

    pub fn finished_job_ttl(&self) -> Duration {
        Duration::from_secs(self.finished_job_ttl_secs)
    }

    pub fn worker_id(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| std::process::id().to_string())
    }
}

impl Config {
    /// Load the config file if one is given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_env(|key| dotenvy::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parse config file {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(database) = var("DATABASE_URL") {
            self.database = database;
        }
        if let Some(api_key) = var("OPENAI_API_KEY") {
            self.ai.api_key = api_key;
        }
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            self.ai.base_url = base_url;
        }
        if let Some(model) = var("AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(worker_id) = var("COURSE_FORGE_WORKER_ID") {
            self.pipeline.worker_id = Some(worker_id);
        }
    }
}
