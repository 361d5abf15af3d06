use crate::limiter::RequestWindow;
use crate::pricing;
use crate::usage::{UsageSnapshot, UsageTracker};
use atelier_core::{AtelierError, AtelierResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

pub const BASE_URL: &str = "https://api.anthropic.com/v1";

pub const MODEL_SONNET: &str = "claude-sonnet-4-5-20250929";
pub const MODEL_OPUS: &str = "claude-opus-4-5-20251101";
pub const MODEL_HAIKU: &str = "claude-3-5-haiku-20241022";

/// Default model for all role agents.
pub const DEFAULT_MODEL: &str = MODEL_SONNET;

const MAX_ATTEMPTS: u32 = 3;
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Per-request knobs. Roles set their own temperature and token ceilings.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub max_tokens: u32,
    pub system: Option<String>,
    pub temperature: f64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            system: None,
            temperature: 0.7,
        }
    }
}

impl CompletionOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Result of one completion, with the usage the budget accounting needs.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub model: String,
    pub duration_ms: u64,
}

/// The seam role agents call through, so tests can substitute a scripted
/// completer for the HTTP client.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> AtelierResult<Completion>;
}

// -- wire types --

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: String,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// HTTP client for the LLM provider.
///
/// One-shot `complete` and multi-turn `chat` share the same envelope:
/// rate-window wait, up to 3 attempts with 1s/2s/4s backoff on transient
/// failures, cost computed from the pricing table, cumulative usage tracked
/// per model.
pub struct LlmClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    limiter: RequestWindow,
    usage: UsageTracker,
}

impl LlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
            http: reqwest::Client::builder()
                .timeout(TRANSPORT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            limiter: RequestWindow::default(),
            usage: UsageTracker::new(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_requests_per_minute(mut self, max_per_minute: u32) -> Self {
        self.limiter = RequestWindow::new(max_per_minute);
        self
    }

    pub async fn usage(&self) -> UsageSnapshot {
        self.usage.snapshot().await
    }

    /// Multi-turn conversation through the same retry/accounting envelope.
    pub async fn chat(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
    ) -> AtelierResult<Completion> {
        self.limiter.acquire().await;
        let start = Instant::now();

        let mut last_err: Option<AtelierError> = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.send(messages, opts).await {
                Ok(resp) => {
                    return self.finish(resp, opts, start).await;
                }
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt + 1 < MAX_ATTEMPTS {
                        let backoff = Duration::from_secs(1 << attempt);
                        warn!(
                            attempt = attempt + 1,
                            backoff_s = backoff.as_secs(),
                            error = %e,
                            "llm request retry"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| AtelierError::Llm(format!("failed after {MAX_ATTEMPTS} attempts"))))
    }

    async fn send(
        &self,
        messages: &[Message],
        opts: &CompletionOptions,
    ) -> AtelierResult<ApiResponse> {
        let request = ApiRequest {
            model: &opts.model,
            max_tokens: opts.max_tokens,
            messages,
            system: opts.system.as_deref(),
            temperature: opts.temperature,
        };

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AtelierError::Llm(format!("transport timeout: {e}"))
                } else {
                    AtelierError::Llm(format!("transport error: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| format!("{} - {}", b.error.kind, b.error.message))
                .unwrap_or(body);
            // Auth failures never succeed on retry.
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(AtelierError::Refused(format!(
                    "api error ({}): {}",
                    status.as_u16(),
                    detail
                )));
            }
            return Err(AtelierError::Llm(format!(
                "api error ({}): {}",
                status.as_u16(),
                detail
            )));
        }

        resp.json::<ApiResponse>()
            .await
            .map_err(|e| AtelierError::Llm(format!("malformed response body: {e}")))
    }

    async fn finish(
        &self,
        resp: ApiResponse,
        opts: &CompletionOptions,
        start: Instant,
    ) -> AtelierResult<Completion> {
        let text: String = resp
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();

        let model = if resp.model.is_empty() {
            opts.model.clone()
        } else {
            resp.model
        };
        let cost = pricing::cost_usd(&model, resp.usage.input_tokens, resp.usage.output_tokens);
        self.usage
            .record(&model, resp.usage.input_tokens, resp.usage.output_tokens, cost)
            .await;

        Ok(Completion {
            text,
            input_tokens: resp.usage.input_tokens,
            output_tokens: resp.usage.output_tokens,
            cost_usd: cost,
            model,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> AtelierResult<Completion> {
        let messages = [Message::user(prompt)];
        self.chat(&messages, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let opts = CompletionOptions::default();
        assert_eq!(opts.model, DEFAULT_MODEL);
        assert_eq!(opts.max_tokens, 4096);
        assert!(opts.system.is_none());
        assert!((opts.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn options_builder_chain() {
        let opts = CompletionOptions::default()
            .with_model(MODEL_HAIKU)
            .with_max_tokens(1024)
            .with_system("JSON only")
            .with_temperature(0.2);
        assert_eq!(opts.model, MODEL_HAIKU);
        assert_eq!(opts.max_tokens, 1024);
        assert_eq!(opts.system.as_deref(), Some("JSON only"));
    }

    #[test]
    fn request_omits_absent_system() {
        let messages = [Message::user("hi")];
        let request = ApiRequest {
            model: MODEL_SONNET,
            max_tokens: 100,
            messages: &messages,
            system: None,
            temperature: 0.3,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 100);
    }

    #[test]
    fn request_includes_system_when_set() {
        let messages = [Message::user("hi")];
        let request = ApiRequest {
            model: MODEL_SONNET,
            max_tokens: 100,
            messages: &messages,
            system: Some("You are a QA Engineer AI."),
            temperature: 0.2,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system"], "You are a QA Engineer AI.");
    }

    #[test]
    fn response_text_concatenates_blocks() {
        let body = serde_json::json!({
            "content": [
                {"type": "text", "text": "part one "},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "part two"}
            ],
            "model": MODEL_SONNET,
            "usage": {"input_tokens": 10, "output_tokens": 20}
        });
        let resp: ApiResponse = serde_json::from_value(body).unwrap();
        let text: String = resp
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(text, "part one part two");
        assert_eq!(resp.usage.output_tokens, 20);
    }

    #[test]
    fn error_body_parses() {
        let body = r#"{"error": {"type": "rate_limit_error", "message": "slow down"}}"#;
        let parsed: ApiErrorBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.kind, "rate_limit_error");
    }
}
