//! OpenRouter chat-completions adapter for the summarization stage.

use crate::Message;
use crate::context::summarizer::{SummaryFuture, SummaryModel};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

/// Default cap on summary length.
pub const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 2048;

// ── Request / response ─────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted.
#[derive(Serialize, Debug)]
pub struct SummaryRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

/// Extract the summary text from a raw response body.
fn parse_summary(body: &str) -> Result<String, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(body).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("OpenRouter API error: {}", err.message));
    }
    if let Some(usage) = parsed.usage {
        debug!(
            "summary token usage: prompt={}, completion={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
        );
    }

    parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .and_then(|c| c.message.content)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| "empty summary response".to_string())
}

// ── Client ─────────────────────────────────────────────────────────

/// [`SummaryModel`] backed by the OpenRouter chat completions API.
///
/// One HTTP attempt per call; retries are the caller's business. Build it
/// once and share it: the inner `reqwest::Client` pools connections.
pub struct OpenRouterSummaryModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    referer: String,
    title: String,
}

impl std::fmt::Debug for OpenRouterSummaryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterSummaryModel")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenRouterSummaryModel {
    /// Create a summary model with the given API key and model id.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("cinch-history/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            temperature: 0.3,
            referer: "https://github.com/cinch-rs".to_string(),
            title: "cinch-history".to_string(),
        })
    }

    /// Create a summary model reading the key from `OPENROUTER_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| format!("{API_KEY_ENV} not set"))?;
        Self::new(api_key, model)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the Referer and X-Title headers OpenRouter uses for attribution.
    pub fn with_headers(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the request body for one summarization call.
    pub fn build_request(&self, instructions: &str, transcript: &str) -> SummaryRequest {
        SummaryRequest {
            model: self.model.clone(),
            messages: vec![Message::system(instructions), Message::human(transcript)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    async fn complete(&self, body: SummaryRequest) -> Result<String, String> {
        debug!(
            "summary request: model={}, transcript={} bytes, max_tokens={}",
            body.model,
            body.messages.last().map_or(0, |m| m.char_len()),
            body.max_tokens,
        );
        trace!(
            "request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );
        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "summary response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }
        parse_summary(&text)
    }
}

impl SummaryModel for OpenRouterSummaryModel {
    fn summarize<'a>(&'a self, instructions: &'a str, transcript: &'a str) -> SummaryFuture<'a> {
        let body = self.build_request(instructions, transcript);
        Box::pin(self.complete(body))
    }
}
