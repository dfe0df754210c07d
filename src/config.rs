use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::llm::RetryPolicy;

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".pr-reporter.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("{0} is not set (config file or environment)")]
    MissingSecret(&'static str),
}

/// Top-level configuration loaded from .pr-reporter.toml plus environment overrides.
///
/// Every field has a default so the file is optional. Secrets are never defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Repository in `owner/name` form
    #[serde(default = "default_repo")]
    pub repo: String,
    /// GitHub API token. If None, falls back to GITHUB_TOKEN env var.
    pub token: Option<String>,
    #[serde(default = "default_github_api")]
    pub api_url: String,
    /// Branch walked by codebase ingestion
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Upper bound on PRs pulled per ingestion run
    #[serde(default = "default_max_prs")]
    pub max_prs: usize,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            token: None,
            api_url: default_github_api(),
            branch: default_branch(),
            max_prs: default_max_prs(),
        }
    }
}

fn default_repo() -> String {
    "exo-explore/exo".to_string()
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_max_prs() -> usize {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_chat_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI API key. If None, falls back to OPENAI_API_KEY env var.
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Exponential backoff factor. Linear backoff when unset.
    pub backoff_multiplier: Option<f64>,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_chat_endpoint(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: None,
            max_delay_secs: default_max_delay_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_chat_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_secs() -> u64 {
    60
}
fn default_attempt_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_embeddings_url")]
    pub embeddings_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Snippets requested per context query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embeddings_url: default_embeddings_url(),
            embedding_model: default_embedding_model(),
            top_k: default_top_k(),
            chunk_lines: default_chunk_lines(),
            chunk_overlap: default_chunk_overlap(),
            max_chunk_chars: default_max_chunk_chars(),
            batch_size: default_batch_size(),
            max_retries: default_embed_retries(),
        }
    }
}

fn default_embeddings_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_top_k() -> usize {
    3
}
fn default_chunk_lines() -> usize {
    60
}
fn default_chunk_overlap() -> usize {
    10
}
fn default_max_chunk_chars() -> usize {
    1_500
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:pr-reporter.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Per-PR tasks in flight inside a stage
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_diff_files")]
    pub max_diff_files: usize,
    #[serde(default = "default_diff_char_budget")]
    pub diff_char_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_diff_files: default_max_diff_files(),
            diff_char_budget: default_diff_char_budget(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}
fn default_max_diff_files() -> usize {
    3
}
fn default_diff_char_budget() -> usize {
    6_000
}

impl Config {
    /// Load configuration from `path` (or .pr-reporter.toml in the current directory),
    /// apply environment overrides and validate.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        // A .env file is optional.
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from(default_path)?
                } else {
                    Config::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path without environment overrides.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay environment values. Secrets only fill in what the file left empty.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.github.token.is_none() {
            self.github.token = lookup("GITHUB_TOKEN");
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("OPENAI_API_KEY");
        }
        if let Some(repo) = lookup("GITHUB_REPO") {
            self.github.repo = repo;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(dir) = lookup("REPORTS_DIR") {
            self.output.reports_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        match self.github.repo.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
            _ => return invalid("github.repo must be in owner/name form"),
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty");
        }
        if self.llm.max_attempts == 0 {
            return invalid("llm.max_attempts must be >= 1");
        }
        if let Some(multiplier) = self.llm.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return invalid("llm.backoff_multiplier must be a finite number >= 1.0");
            }
        }
        if self.llm.max_delay_secs == 0 {
            return invalid("llm.max_delay_secs must be >= 1");
        }
        if self.llm.attempt_timeout_secs == 0 {
            return invalid("llm.attempt_timeout_secs must be >= 1");
        }
        if self.index.top_k == 0 {
            return invalid("index.top_k must be >= 1");
        }
        if self.index.chunk_lines == 0 || self.index.chunk_overlap >= self.index.chunk_lines {
            return invalid("index.chunk_overlap must be smaller than index.chunk_lines");
        }
        if self.index.max_chunk_chars == 0 || self.index.batch_size == 0 {
            return invalid("index.max_chunk_chars and index.batch_size must be >= 1");
        }
        if self.pipeline.concurrency == 0 {
            return invalid("pipeline.concurrency must be >= 1");
        }
        if self.database.url.trim().is_empty() {
            return invalid("database.url must not be empty");
        }
        Ok(())
    }

    /// GitHub token; required for every GitHub call.
    pub fn github_token(&self) -> Result<String, ConfigError> {
        self.github
            .token
            .clone()
            .ok_or(ConfigError::MissingSecret("GITHUB_TOKEN"))
    }

    /// OpenAI key; required for chat completions and embeddings.
    pub fn openai_api_key(&self) -> Result<String, ConfigError> {
        self.llm
            .api_key
            .clone()
            .ok_or(ConfigError::MissingSecret("OPENAI_API_KEY"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            base_delay: Duration::from_millis(self.llm.base_delay_ms),
            multiplier: self.llm.backoff_multiplier,
            max_delay: Duration::from_secs(self.llm.max_delay_secs),
            attempt_timeout: Duration::from_secs(self.llm.attempt_timeout_secs),
        }
    }
}
