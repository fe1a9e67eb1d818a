//! LLM-based classification into a fixed taxonomy.
//!
//! The provider is asked for a single JSON object. Its answer is filtered
//! against the known names, floored, capped at [`MAX_CONFIDENCE`], and turned
//! into an [`LlmOutcome`] the orchestrator matches on.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::ClassifierConfig;
use crate::json_extract::extract_first_json_object;
use crate::keywords::{MAX_CONFIDENCE, MIN_CATEGORY_CONFIDENCE};
use crate::llm::{CompletionBackend, CompletionRequest, LlmError};

pub const MIN_PRODUCT_AREA_CONFIDENCE: f64 = 0.30;
/// A post belongs to at most two product areas.
pub const MAX_PRODUCT_AREAS: usize = 2;
/// Confidence given to the catch-all category when nothing else qualifies.
pub const FALLBACK_CONFIDENCE: f64 = 0.30;

const PROMPT_BODY_CHARS: usize = 500;
const COMBINED_TEXT_CHARS: usize = 1000;
pub const SUMMARY_MAX_CHARS: usize = 200;
const SUMMARY_MAX_TOKENS: u32 = 100;

/// One taxonomy name with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub name: String,
    pub confidence: f64,
}

impl Classification {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence,
        }
    }
}

/// Result of one LLM classification step.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutcome {
    Success(Vec<Classification>),
    /// Provider signalled quota or rate exhaustion. The caller must stop.
    RateLimited,
    /// Transport or provider failure other than rate limiting.
    Failed(String),
}

impl From<LlmError> for LlmOutcome {
    fn from(e: LlmError) -> Self {
        if e.is_rate_limited() {
            LlmOutcome::RateLimited
        } else {
            LlmOutcome::Failed(e.to_string())
        }
    }
}

/// Prefix of `s` holding at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Title and body joined by a newline, capped at 1000 characters.
pub fn combined_text(title: &str, body: &str) -> String {
    truncate_chars(&format!("{}\n{}", title, body), COMBINED_TEXT_CHARS).to_string()
}

pub fn category_prompt(title: &str, body: &str, valid: &[String], catch_all: &str) -> String {
    format!(
        r#"You are a category classifier for subreddit posts. Analyze the post and assign it to 1-3 most relevant categories.

Available categories:
{}

Post:
Title: {}
Content: {}

Instructions:
- Assign 1-3 most relevant categories
- Provide a confidence score (0.0-1.0) for each
- Only include categories with confidence >= {:.2}
- If no specific category fits well, use "{}"
- Respond ONLY with valid JSON (no markdown):

{{"categories": [{{"name": "Category Name", "confidence": 0.85}}]}}"#,
        valid.join(", "),
        title,
        truncate_chars(body, PROMPT_BODY_CHARS),
        MIN_CATEGORY_CONFIDENCE,
        catch_all,
    )
}

pub fn product_area_prompt(title: &str, body: &str, valid: &[String]) -> String {
    format!(
        r#"You are classifying subreddit posts by product area. Assign the post to the 1-2 product areas it is most about.

Product areas:
{}

Post:
{}

Instructions:
- Assign 1-2 product areas, most relevant first
- Provide a confidence score (0.0-1.0) for each
- Only include product areas with confidence >= {:.2}
- Respond ONLY with valid JSON (no markdown):

{{"productAreas": [{{"name": "Product Area", "confidence": 0.85}}]}}"#,
        valid.join(", "),
        combined_text(title, body),
        MIN_PRODUCT_AREA_CONFIDENCE,
    )
}

pub fn summary_prompt(title: &str, body: &str) -> String {
    format!(
        "Summarize this subreddit post in ONE sentence (max 100 characters). Be concise and descriptive.\n\nTitle: {}\nContent: {}\n\nRespond with ONLY the summary sentence, nothing else.",
        title,
        truncate_chars(body, PROMPT_BODY_CHARS)
    )
}

/// Parse raw `{name, confidence}` entries from the first JSON object in
/// `text`, reading the first of `keys` that holds an array. Entries with a
/// missing name or non-numeric confidence are dropped. `None` means the text
/// held no parseable object.
fn parse_entries(text: &str, keys: &[&str]) -> Option<Vec<Classification>> {
    let json = extract_first_json_object(text)?;
    let value: Value = serde_json::from_str(json).ok()?;

    let entries = keys
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_array))
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    let name = entry.get("name")?.as_str()?.trim();
                    let confidence = entry.get("confidence")?.as_f64()?;
                    Some(Classification::new(name, confidence))
                })
                .collect()
        })
        .unwrap_or_default();

    Some(entries)
}

/// Keep known names at or above `floor`, cap at 0.98, and drop repeated names
/// (first occurrence wins).
fn validate(entries: Vec<Classification>, valid: &[String], floor: f64) -> Vec<Classification> {
    let known: HashSet<&str> = valid.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();

    entries
        .into_iter()
        .filter(|c| known.contains(c.name.as_str()) && c.confidence >= floor)
        .filter(|c| seen.insert(c.name.clone()))
        .map(|c| Classification {
            confidence: c.confidence.min(MAX_CONFIDENCE),
            name: c.name,
        })
        .collect()
}

/// Category-mode parsing. Never empty: unparseable output or zero valid
/// entries yield the catch-all at [`FALLBACK_CONFIDENCE`].
pub fn parse_category_response(text: &str, valid: &[String], catch_all: &str) -> Vec<Classification> {
    let entries = match parse_entries(text, &["categories"]) {
        Some(entries) => entries,
        None => {
            tracing::warn!(response = %truncate_chars(text, 200), "Unparseable classification response");
            Vec::new()
        }
    };

    let valid_entries = validate(entries, valid, MIN_CATEGORY_CONFIDENCE);
    if valid_entries.is_empty() {
        return vec![Classification::new(catch_all, FALLBACK_CONFIDENCE)];
    }
    valid_entries
}

/// Product-area parsing: top two by confidence, possibly empty.
pub fn parse_product_area_response(text: &str, valid: &[String]) -> Vec<Classification> {
    let entries = match parse_entries(text, &["productAreas", "product_areas", "categories"]) {
        Some(entries) => entries,
        None => {
            tracing::warn!(response = %truncate_chars(text, 200), "Unparseable product area response");
            return Vec::new();
        }
    };

    let mut valid_entries = validate(entries, valid, MIN_PRODUCT_AREA_CONFIDENCE);
    valid_entries.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    valid_entries.truncate(MAX_PRODUCT_AREAS);
    valid_entries
}

/// Clean a model summary: first line, no wrapping quotes, at most 200 chars.
pub fn clean_summary(text: &str) -> String {
    let line = text.trim().lines().next().unwrap_or_default().trim();
    let unquoted = line.trim_matches(|c| c == '"' || c == '\'').trim();
    truncate_chars(unquoted, SUMMARY_MAX_CHARS).to_string()
}

/// Classifier bound to one completion backend.
#[derive(Clone)]
pub struct LlmClassifier {
    backend: Arc<dyn CompletionBackend>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClassifier {
    pub fn new(backend: Arc<dyn CompletionBackend>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            backend,
            temperature,
            max_tokens,
        }
    }

    pub fn from_config(backend: Arc<dyn CompletionBackend>, config: &ClassifierConfig) -> Self {
        Self::new(backend, config.temperature, config.max_tokens)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    async fn complete(&self, prompt: String, max_tokens: u32) -> Result<String, LlmError> {
        let request = CompletionRequest {
            prompt,
            temperature: self.temperature,
            max_tokens,
        };
        self.backend.complete(&request).await
    }

    /// Classify into 1-3 categories out of `valid`.
    pub async fn classify_categories(
        &self,
        title: &str,
        body: &str,
        valid: &[String],
        catch_all: &str,
    ) -> LlmOutcome {
        let prompt = category_prompt(title, body, valid, catch_all);
        match self.complete(prompt, self.max_tokens).await {
            Ok(text) => LlmOutcome::Success(parse_category_response(&text, valid, catch_all)),
            Err(e) => e.into(),
        }
    }

    /// Classify into at most two product areas out of `valid`.
    pub async fn classify_product_areas(&self, title: &str, body: &str, valid: &[String]) -> LlmOutcome {
        let prompt = product_area_prompt(title, body, valid);
        match self.complete(prompt, self.max_tokens).await {
            Ok(text) => LlmOutcome::Success(parse_product_area_response(&text, valid)),
            Err(e) => e.into(),
        }
    }

    /// One-sentence summary for the post.
    pub async fn summarize(&self, title: &str, body: &str) -> Result<String, LlmError> {
        let text = self.complete(summary_prompt(title, body), SUMMARY_MAX_TOKENS).await?;
        Ok(clean_summary(&text))
    }
}
