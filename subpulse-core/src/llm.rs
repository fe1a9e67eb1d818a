//! Completion provider for classification and summaries.
//!
//! Provides a `CompletionBackend` trait with two implementations:
//! - **Groq**: OpenAI-compatible `/chat/completions` endpoint
//! - **Gemini**: Generative Language `models/{model}:generateContent`
//!
//! [`create_backend`] picks one from the classifier config.
//!
//! Quota exhaustion is surfaced as [`LlmError::RateLimited`] and is never
//! retried here. Network failures and 5xx responses are retried with
//! exponential backoff.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::{ClassifierConfig, CompletionProvider};

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Model parameters for one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Abstraction over completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one prompt and return the raw model text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Missing completion in response")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Worth another attempt: connection trouble or a server-side failure.
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

fn rate_limit_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)rate[ _-]?limit|quota|too many requests|resource[ _]exhausted").ok()
        })
        .as_ref()
}

/// Map a non-success provider response onto an error, recognising quota and
/// rate exhaustion regardless of the status code the provider chose.
pub fn classify_api_error(code: u16, message: String) -> LlmError {
    let quota_message = rate_limit_pattern().is_some_and(|re| re.is_match(&message));
    if code == 429 || quota_message {
        LlmError::RateLimited { message }
    } else {
        LlmError::Api { code, message }
    }
}

/// Build an error from a non-success response body, preferring the
/// provider's own `error.message` (and `error.status` when present).
fn error_from_body(code: u16, body: String) -> LlmError {
    let message = serde_json::from_str::<ProviderErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| match e.status {
            Some(status) => format!("{}: {}", status, e.message),
            None => e.message,
        })
        .unwrap_or(body);

    tracing::error!(code, message = %message, "Completion API error");

    classify_api_error(code, message)
}

/// Retry transient failures with jittered exponential backoff. Rate limits
/// and client errors return immediately.
async fn with_retries<F, Fut>(
    backend: &str,
    max_retries: usize,
    retry_delay_ms: u64,
    attempt: F,
) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(retry_delay_ms)
        .max_delay(Duration::from_secs(10))
        .map(jitter)
        .take(max_retries);

    let result = RetryIf::spawn(retry_strategy, attempt, |e: &LlmError| e.is_transient()).await;

    if let Err(e) = &result {
        if !e.is_rate_limited() {
            tracing::error!(
                backend,
                attempts = max_retries,
                error = %e,
                "Completion request failed"
            );
        }
    }

    result
}

/// Build the configured backend. `api_key` overrides the provider's
/// environment variable.
pub fn create_backend(
    config: &ClassifierConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    match config.provider {
        CompletionProvider::Groq => Ok(Arc::new(GroqClient::new(GroqConfig::from_classifier(
            config, api_key,
        ))?)),
        CompletionProvider::Gemini => Ok(Arc::new(GeminiClient::new(
            GeminiConfig::from_classifier(config, api_key),
        )?)),
    }
}

// ============================================================================
// Provider API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

// ============================================================================
// GroqClient
// ============================================================================

/// Connection settings for [`GroqClient`].
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GroqConfig {
    /// Build from the classifier section; the key comes from `GROQ_API_KEY`
    /// when not given explicitly.
    pub fn from_classifier(config: &ClassifierConfig, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var(CompletionProvider::Groq.api_key_var()).ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: config.model().to_string(),
            base_url: config.base_url().to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// Chat-completions client for Groq (or any OpenAI-compatible endpoint).
#[derive(Debug, Clone)]
pub struct GroqClient {
    client: Client,
    config: GroqConfig,
}

impl GroqClient {
    pub fn new(config: GroqConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: 1.0,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), error_body));
        }

        let chat: ChatResponse = response.json().await?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl CompletionBackend for GroqClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        with_retries(
            self.name(),
            self.config.max_retries,
            self.config.retry_delay_ms,
            || self.complete_once(request),
        )
        .await
    }

    fn name(&self) -> &str {
        "groq"
    }
}

// ============================================================================
// GeminiClient
// ============================================================================

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GeminiConfig {
    /// Build from the classifier section; the key comes from `GEMINI_API_KEY`
    /// when not given explicitly.
    pub fn from_classifier(config: &ClassifierConfig, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var(CompletionProvider::Gemini.api_key_var()).ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: config.model().to_string(),
            base_url: config.base_url().to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// `generateContent` client for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let body = GenerateRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(error_from_body(status.as_u16(), error_body));
        }

        let generated: GenerateResponse = response.json().await?;

        let text: String = generated
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        with_retries(
            self.name(),
            self.config.max_retries,
            self.config.retry_delay_ms,
            || self.complete_once(request),
        )
        .await
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str, base_url: String) -> GroqConfig {
        GroqConfig {
            api_key: api_key.to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            base_url,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: prompt.to_string(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    fn completion_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "messages": [{ "role": "user", "content": "classify me" }],
                "max_tokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{}")))
            .mount(&mock_server)
            .await;

        let text = client.complete(&request("classify me")).await.unwrap();
        assert_eq!(text, "{}");
    }

    #[tokio::test]
    async fn test_429_is_rate_limited_and_not_retried() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit reached for model", "type": "tokens" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client.complete(&request("x")).await.unwrap_err();
        assert!(err.is_rate_limited(), "expected RateLimited, got {:?}", err);
    }

    #[tokio::test]
    async fn test_quota_message_on_other_status_is_rate_limited() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": { "message": "You exceeded your current quota" }
            })))
            .mount(&mock_server)
            .await;

        let err = client.complete(&request("x")).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_500_is_retried_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .mount(&mock_server)
            .await;

        let text = client.complete(&request("x")).await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn test_400_is_plain_api_error() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "model not found" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&request("x")).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "model not found");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_error() {
        let mock_server = MockServer::start().await;
        let client = GroqClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete(&request("x")).await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_missing_api_key() {
        let result = GroqClient::new(test_config("", "http://localhost".to_string()));
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    fn gemini_config(base_url: String) -> GeminiConfig {
        GeminiConfig {
            api_key: "gemini-key".to_string(),
            model: "gemini-2.0-flash".to_string(),
            base_url,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_gemini_joins_candidate_parts() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(gemini_config(mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "gemini-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "role": "user", "parts": [{ "text": "classify me" }] }],
                "generationConfig": { "maxOutputTokens": 500 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "{\"categories\": " }, { "text": "[]}" }] }
                }]
            })))
            .mount(&mock_server)
            .await;

        let text = client.complete(&request("classify me")).await.unwrap();
        assert_eq!(text, "{\"categories\": []}");
    }

    #[tokio::test]
    async fn test_gemini_resource_exhausted_is_rate_limited() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(gemini_config(mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&request("x")).await {
            Err(LlmError::RateLimited { message }) => {
                assert_eq!(message, "RESOURCE_EXHAUSTED: Quota exceeded");
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gemini_without_candidates_is_empty() {
        let mock_server = MockServer::start().await;
        let client = GeminiClient::new(gemini_config(mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [],
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete(&request("x")).await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_create_backend_follows_provider() {
        let groq = ClassifierConfig::default();
        let backend = create_backend(&groq, Some("k".to_string())).unwrap();
        assert_eq!(backend.name(), "groq");

        let gemini = ClassifierConfig {
            provider: CompletionProvider::Gemini,
            ..ClassifierConfig::default()
        };
        let backend = create_backend(&gemini, Some("k".to_string())).unwrap();
        assert_eq!(backend.name(), "gemini");

        assert!(matches!(
            create_backend(&gemini, Some(String::new())),
            Err(LlmError::MissingApiKey)
        ));
    }

    #[test]
    fn test_classify_api_error_patterns() {
        assert!(classify_api_error(429, String::new()).is_rate_limited());
        assert!(classify_api_error(400, "RESOURCE_EXHAUSTED".into()).is_rate_limited());
        assert!(classify_api_error(503, "Too Many Requests".into()).is_rate_limited());
        assert!(!classify_api_error(503, "service unavailable".into()).is_rate_limited());
    }
}
