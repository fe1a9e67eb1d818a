use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct SubpulseConfig {
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

fn default_acquire_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub subreddit: String,
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_feed_base_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_user_agent() -> String {
    format!("subpulse/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Which completion API classification and summaries go through.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    #[default]
    Groq,
    Gemini,
}

impl CompletionProvider {
    pub fn default_model(self) -> &'static str {
        match self {
            CompletionProvider::Groq => "llama-3.3-70b-versatile",
            CompletionProvider::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            CompletionProvider::Groq => "https://api.groq.com/openai/v1",
            CompletionProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            CompletionProvider::Groq => "GROQ_API_KEY",
            CompletionProvider::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Completion provider settings. `enabled = false` or a missing API key
/// leaves keyword scoring as the only strategy.
#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    pub enabled: bool,
    #[serde(default)]
    pub provider: CompletionProvider,
    /// Falls back to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Fixed gap between successive provider calls.
    pub request_delay_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub classify_product_areas: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: CompletionProvider::default(),
            model: None,
            base_url: None,
            temperature: 0.3,
            max_tokens: 500,
            request_delay_ms: 2500,
            max_retries: 3,
            retry_delay_ms: 1000,
            classify_product_areas: false,
        }
    }
}

impl ClassifierConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub target_count: usize,
    pub max_pages: usize,
    pub window_hours: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            target_count: 100,
            max_pages: 10,
            window_hours: 168,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxonomyConfig {
    pub path: String,
    pub catch_all: String,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            path: "taxonomy.toml".to_string(),
            catch_all: "General".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScheduleConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

impl SubpulseConfig {
    /// Load from a TOML file, then apply `SUBPULSE__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SUBPULSE").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}
