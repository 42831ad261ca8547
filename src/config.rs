//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal config is just:
//!
//! ```toml
//! [db]
//! path = "./data/site.sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub forms: FormsConfig,
    #[serde(default)]
    pub mailer: MailerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Upper bound on live chat sessions; the oldest is evicted past it.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_max_sessions() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL of the provider API. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key: None,
            api_key_env: default_openai_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a snippet to be used as context.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    /// Prior transcript turns forwarded with each query.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_match_threshold() -> f32 {
    0.7
}
fn default_match_count() -> usize {
    5
}
fn default_history_turns() -> usize {
    10
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the virtual assistant of an IT services company \
that builds custom software, AI solutions, cloud infrastructure, and runs professional training \
programs. Answer questions about the company's services, case studies, careers, and training \
courses in a friendly, concise, professional tone. Use the provided context when it is relevant. \
If you do not know the answer, say so and suggest contacting the team through the contact form. \
Never invent prices, client names, or commitments.";

pub const DEFAULT_APOLOGY: &str =
    "I'm having trouble connecting right now. Please try again in a moment.";

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_chat_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_apology")]
    pub apology: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            url: default_chat_url(),
            api_key: None,
            api_key_env: default_openai_key_env(),
            temperature: default_temperature(),
            max_tokens: default_chat_max_tokens(),
            timeout_secs: default_timeout_secs(),
            system_prompt: default_system_prompt(),
            apology: default_apology(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_chat_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_chat_max_tokens() -> u32 {
    500
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_apology() -> String {
    DEFAULT_APOLOGY.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandoffConfig {
    #[serde(default = "default_agent_names")]
    pub agent_names: Vec<String>,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
    #[serde(default = "default_intro_delay_ms")]
    pub intro_delay_ms: u64,
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            agent_names: default_agent_names(),
            connect_delay_ms: default_connect_delay_ms(),
            intro_delay_ms: default_intro_delay_ms(),
            redirect_delay_ms: default_redirect_delay_ms(),
        }
    }
}

fn default_agent_names() -> Vec<String> {
    ["Sarah", "Michael", "Priya", "David", "Elena"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_connect_delay_ms() -> u64 {
    1000
}
fn default_intro_delay_ms() -> u64 {
    1500
}
fn default_redirect_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormsConfig {
    /// Submissions allowed per client within `window_secs`.
    #[serde(default = "default_max_submissions")]
    pub max_submissions: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_resume_max_bytes")]
    pub resume_max_bytes: usize,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            max_submissions: default_max_submissions(),
            window_secs: default_window_secs(),
            upload_dir: default_upload_dir(),
            resume_max_bytes: default_resume_max_bytes(),
        }
    }
}

fn default_max_submissions() -> u32 {
    3
}
fn default_window_secs() -> u64 {
    3600
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}
fn default_resume_max_bytes() -> usize {
    5 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailerConfig {
    /// `disabled` or `http`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_mailer_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mailer_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_mailer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_mailer_url(),
            api_key: None,
            api_key_env: default_mailer_key_env(),
            from: default_mail_from(),
            to: Vec::new(),
            timeout_secs: default_mailer_timeout_secs(),
        }
    }
}

impl MailerConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_mailer_url() -> String {
    "https://api.resend.com".to_string()
}
fn default_mailer_key_env() -> String {
    "RESEND_API_KEY".to_string()
}
fn default_mail_from() -> String {
    "Website <noreply@example.com>".to_string()
}
fn default_mailer_timeout_secs() -> u64 {
    10
}

/// Resolve an API key from an inline value or the named environment variable.
pub fn resolve_api_key(inline: Option<&str>, env_name: &str) -> Result<String> {
    if let Some(key) = inline {
        return Ok(key.to_string());
    }
    std::env::var(env_name).with_context(|| format!("{} environment variable not set", env_name))
}

impl Config {
    /// A config pointing at `db_path` with every other section defaulted.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            chat: ChatConfig::default(),
            handoff: HandoffConfig::default(),
            forms: FormsConfig::default(),
            mailer: MailerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        if !(0.0..=1.0).contains(&self.retrieval.match_threshold) {
            bail!("retrieval.match_threshold must be in [0.0, 1.0]");
        }
        if self.retrieval.match_count == 0 {
            bail!("retrieval.match_count must be >= 1");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        if self.handoff.agent_names.is_empty() {
            bail!("handoff.agent_names must not be empty");
        }

        if self.forms.max_submissions == 0 {
            bail!("forms.max_submissions must be >= 1");
        }

        match self.mailer.provider.as_str() {
            "disabled" => {}
            "http" => {
                if self.mailer.to.is_empty() {
                    bail!("mailer.to must list at least one recipient when provider is 'http'");
                }
            }
            other => bail!(
                "Unknown mailer provider: '{}'. Must be disabled or http.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
