use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// Which completion API the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    /// Google Gemini `generateContent`.
    Gemini,
    /// OpenRouter, OpenAI-compatible with a bearer key.
    OpenRouter,
    /// Local Ollama through its OpenAI-compatible `/v1` endpoint.
    Ollama,
}

impl LlmProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "gemini" => Some(Self::Gemini),
            "openrouter" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-1.5-flash",
            Self::OpenRouter => "meta-llama/llama-3.1-8b-instruct",
            Self::Ollama => "llama3",
        }
    }
}

#[derive(Clone, Debug)]
pub struct LlmClientConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_error_body_bytes: usize,
}

impl LlmClientConfig {
    /// Provider defaults with no API key: 30s timeout, 3 retries, 200ms..5s backoff.
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_string(),
            api_key: None,
            model: provider.default_model().to_string(),
            default_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5_000),
            max_error_body_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("response contained no completion text")]
    EmptyCompletion,
}

// Transport errors print the request URL; it never leaves this module.
impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.without_url())
    }
}

impl LlmError {
    /// Timeouts, dropped connections, 429 and 5xx are worth another attempt.
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Upstream { status, .. } | Self::UpstreamBody { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::InvalidJson(_) | Self::EmptyCompletion => false,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .user_agent("project-marketplace/api")
            .build()?;
        let config = LlmClientConfig {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    /// Send one prompt (with optional system prompt) and return the completion text.
    pub async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LlmError> {
        let text = match self.config.provider {
            LlmProvider::Gemini => {
                let body = GeminiRequest::new(prompt, system_prompt);
                let resp: GeminiResponse = self.post_json(&body).await?;
                resp.into_text()
            }
            LlmProvider::OpenRouter | LlmProvider::Ollama => {
                let body = ChatCompletionRequest::new(&self.config.model, prompt, system_prompt);
                let resp: ChatCompletionResponse = self.post_json(&body).await?;
                resp.into_text()
            }
        };
        let text = text.ok_or(LlmError::EmptyCompletion)?;
        debug!(
            provider = self.config.provider.as_str(),
            model = %self.config.model,
            chars = text.len(),
            "completion received"
        );
        Ok(text)
    }

    fn endpoint(&self) -> String {
        match self.config.provider {
            LlmProvider::Gemini => format!(
                "{}/models/{}:generateContent",
                self.config.base_url, self.config.model
            ),
            LlmProvider::OpenRouter | LlmProvider::Ollama => {
                format!("{}/chat/completions", self.config.base_url)
            }
        }
    }

    /// Credentials travel in headers only, never in the URL.
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let Some(key) = self.config.api_key.as_deref() else {
            return req;
        };
        match self.config.provider {
            LlmProvider::Gemini => req.header(GEMINI_KEY_HEADER, key),
            LlmProvider::OpenRouter | LlmProvider::Ollama => req.bearer_auth(key),
        }
    }

    async fn post_json<B, T>(&self, body: &B) -> Result<T, LlmError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.endpoint();
        let mut retries = 0;
        loop {
            match self.send_once(&url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.config.max_retries && e.is_transient() => {
                    let delay = self.retry_delay(retries);
                    retries += 1;
                    warn!(
                        retry = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "llm request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<B, T>(&self, url: &str, body: &B) -> Result<T, LlmError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let req = self
            .http
            .post(url)
            .timeout(self.config.default_timeout)
            .json(body);
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }
        let shown = &bytes[..bytes.len().min(self.config.max_error_body_bytes)];
        Err(upstream_error(status, String::from_utf8_lossy(shown).into_owned()))
    }

    /// Doubles from `initial_backoff` up to `max_backoff`, plus up to a quarter of that in jitter.
    fn retry_delay(&self, retry: u32) -> Duration {
        let base = self
            .config
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.config.max_backoff);
        let jitter_cap = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
    }
}

fn upstream_error(status: StatusCode, body: String) -> LlmError {
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => LlmError::Upstream {
            status,
            message: envelope
                .error
                .message
                .unwrap_or_else(|| "unknown upstream error".to_string()),
        },
        Err(_) => LlmError::UpstreamBody { status, body },
    }
}

// Both Gemini and OpenAI-compatible hosts use `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    message: Option<String>,
}

// --- OpenAI-compatible wire types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionRequest {
    fn new(model: &str, prompt: &str, system_prompt: Option<&str>) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(Message {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        Self {
            model: model.to_string(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

impl ChatCompletionResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

// --- Gemini wire types ---

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiRequest {
    // Gemini v1 takes the system prompt as a leading part of the single user turn.
    fn new(prompt: &str, system_prompt: Option<&str>) -> Self {
        let parts = system_prompt
            .into_iter()
            .chain(std::iter::once(prompt))
            .map(|t| GeminiPart {
                text: Some(t.to_string()),
            })
            .collect();
        Self {
            contents: vec![GeminiContent { parts }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiResponse {
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content
            .parts
            .into_iter()
            .next()?
            .text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_parse() {
        assert_eq!(LlmProvider::parse("Gemini"), Some(LlmProvider::Gemini));
        assert_eq!(LlmProvider::parse(" openrouter "), Some(LlmProvider::OpenRouter));
        assert_eq!(LlmProvider::parse("ollama"), Some(LlmProvider::Ollama));
        assert_eq!(LlmProvider::parse("gpt"), None);
        assert_eq!(LlmProvider::parse(LlmProvider::OpenRouter.as_str()), Some(LlmProvider::OpenRouter));
    }

    #[test]
    fn test_chat_request_includes_system_prompt_first() {
        let req = ChatCompletionRequest::new("m", "hello", Some("be terse"));
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], json!("m"));
        assert_eq!(v["max_tokens"], json!(1024));
        assert_eq!(v["messages"][0], json!({"role": "system", "content": "be terse"}));
        assert_eq!(v["messages"][1], json!({"role": "user", "content": "hello"}));

        let req = ChatCompletionRequest::new("m", "hello", None);
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_gemini_request_parts() {
        let v = serde_json::to_value(GeminiRequest::new("hello", Some("sys"))).unwrap();
        assert_eq!(
            v,
            json!({"contents": [{"parts": [{"text": "sys"}, {"text": "hello"}]}]})
        );
    }

    #[test]
    fn test_gemini_response_text() {
        let resp: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "answer"}], "role": "model"}}]
        }))
        .unwrap();
        assert_eq!(resp.into_text().as_deref(), Some("answer"));

        let empty: GeminiResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.into_text(), None);
    }

    #[test]
    fn test_chat_response_text() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]
        }))
        .unwrap();
        assert_eq!(resp.into_text().as_deref(), Some("hi"));
    }

    #[test]
    fn test_upstream_error_envelope() {
        let err = upstream_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "API key not valid", "code": 400}}"#.to_string(),
        );
        assert!(matches!(err, LlmError::Upstream { ref message, .. } if message == "API key not valid"));

        let err = upstream_error(StatusCode::BAD_GATEWAY, "<html>".to_string());
        assert!(matches!(err, LlmError::UpstreamBody { .. }));
    }

    #[test]
    fn test_transient_errors() {
        let retryable = LlmError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: String::new(),
        };
        let server = LlmError::UpstreamBody {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        let client = LlmError::Upstream {
            status: StatusCode::UNAUTHORIZED,
            message: String::new(),
        };
        assert!(retryable.is_transient());
        assert!(server.is_transient());
        assert!(!client.is_transient());
        assert!(!LlmError::EmptyCompletion.is_transient());
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut config = LlmClientConfig::new(LlmProvider::Ollama);
        config.initial_backoff = Duration::from_millis(200);
        config.max_backoff = Duration::from_millis(1_000);
        let client = LlmClient::new(config).unwrap();

        let first = client.retry_delay(0);
        assert!(first >= Duration::from_millis(200) && first <= Duration::from_millis(250));
        let second = client.retry_delay(1);
        assert!(second >= Duration::from_millis(400) && second <= Duration::from_millis(500));
        let late = client.retry_delay(20);
        assert!(late >= Duration::from_millis(1_000) && late <= Duration::from_millis(1_250));
    }

    #[test]
    fn test_gemini_endpoint_carries_no_key() {
        let mut config = LlmClientConfig::new(LlmProvider::Gemini);
        config.api_key = Some("SECRET-GEMINI-KEY".to_string());
        let client = LlmClient::new(config).unwrap();
        let url = client.endpoint();
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1/models/gemini-1.5-flash:generateContent"
        );
        assert!(!url.contains("key="));
    }

    #[tokio::test]
    async fn test_transport_error_hides_credentials() {
        let mut config = LlmClientConfig::new(LlmProvider::Gemini);
        config.base_url = "http://127.0.0.1:9/v1".to_string();
        config.api_key = Some("SECRET-GEMINI-KEY".to_string());
        config.max_retries = 0;
        config.default_timeout = Duration::from_secs(2);
        let client = LlmClient::new(config).unwrap();

        let err = client.complete("hello", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Request(_)));
        let shown = err.to_string();
        assert!(!shown.contains("SECRET-GEMINI-KEY"), "{shown}");
        assert!(!shown.contains("127.0.0.1:9"), "{shown}");
    }

    #[test]
    fn test_client_trims_base_url() {
        let mut config = LlmClientConfig::new(LlmProvider::Ollama);
        config.base_url = "http://ai:11434/v1/".to_string();
        let client = LlmClient::new(config).unwrap();
        assert_eq!(client.config().base_url, "http://ai:11434/v1");
    }
}
