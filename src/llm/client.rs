//! LLM client trait and provider implementations.
//!
//! Clients make exactly one attempt per call and report failures as
//! classified `LlmResponse` values; retries, fallback, and health tracking
//! live in the multiplexer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::{
    ChatRequest, ChatRole, LlmErrorType, LlmResponse, Provider, TokenUsage,
};

/// Chat-completion client for one provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one chat completion attempt.
    async fn chat(&self, request: &ChatRequest) -> LlmResponse;

    /// The provider this client talks to.
    fn provider(&self) -> Provider;

    /// Model used when the request does not pin one.
    fn default_model(&self) -> &str;
}

/// Configuration for HTTP-backed clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub model: String,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds
    pub read_timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: model.into(),
            connect_timeout_secs: 30,
            read_timeout_secs: 180,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }
}

fn build_http_client(config: &ClientConfig) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.read_timeout_secs))
        .build()
        .unwrap_or_default()
}

fn classify_transport_error(err: &reqwest::Error) -> LlmErrorType {
    if err.is_timeout() {
        LlmErrorType::Timeout
    } else if err.is_connect() || err.is_request() {
        LlmErrorType::Network
    } else {
        LlmErrorType::Unknown
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client (DeepSeek, OpenAI)
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible chat endpoints.
///
/// DeepSeek exposes the same wire format, so one implementation serves both
/// providers; the `provider` field keeps routing and accounting honest.
pub struct OpenAiCompatClient {
    config: ClientConfig,
    provider: Provider,
    http: Client,
}

impl OpenAiCompatClient {
    const OPENAI_BASE_URL: &'static str = "https://api.openai.com/v1";
    const DEEPSEEK_BASE_URL: &'static str = "https://api.deepseek.com/v1";

    pub fn openai(config: ClientConfig) -> Self {
        let http = build_http_client(&config);
        Self {
            config,
            provider: Provider::OpenAi,
            http,
        }
    }

    pub fn deepseek(config: ClientConfig) -> Self {
        let http = build_http_client(&config);
        Self {
            config,
            provider: Provider::DeepSeek,
            http,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(match self.provider {
            Provider::DeepSeek => Self::DEEPSEEK_BASE_URL,
            _ => Self::OPENAI_BASE_URL,
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, request: &ChatRequest) -> LlmResponse {
        let started = Instant::now();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        let messages: Vec<OpenAiMessage> = request
            .messages
            .iter()
            .map(|m| OpenAiMessage {
                role: match m.role {
                    ChatRole::System => "system".to_string(),
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let api_request = OpenAiRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url());
        let result = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&api_request)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                return LlmResponse::error(
                    Some(self.provider),
                    classify_transport_error(&e),
                    format!("request failed: {e}"),
                );
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return LlmResponse::error(
                    Some(self.provider),
                    LlmErrorType::Network,
                    format!("failed to read body: {e}"),
                );
            }
        };

        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<OpenAiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return LlmResponse::error(
                Some(self.provider),
                LlmErrorType::from_status(status),
                message,
            );
        }

        let parsed: OpenAiResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                return LlmResponse::error(
                    Some(self.provider),
                    LlmErrorType::Parse,
                    format!("failed to parse response: {e}"),
                );
            }
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return LlmResponse::error(
                Some(self.provider),
                LlmErrorType::Parse,
                "no choices in response",
            );
        };

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        LlmResponse::ok(
            self.provider,
            parsed.model.unwrap_or(model),
            choice.message.content,
            usage,
            started.elapsed().as_secs_f64(),
        )
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }
}

// ---------------------------------------------------------------------------
// Anthropic client
// ---------------------------------------------------------------------------

/// Anthropic messages-API client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(&config);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, request: &ChatRequest) -> LlmResponse {
        let started = Instant::now();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());

        // Anthropic takes the system prompt out of band
        let system = request
            .messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .reduce(|a, b| format!("{a}\n{b}"));

        let messages: Vec<OpenAiMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| OpenAiMessage {
                role: match m.role {
                    ChatRole::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(2000),
            system,
            temperature: request.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url());
        let result = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&api_request)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                return LlmResponse::error(
                    Some(Provider::Anthropic),
                    classify_transport_error(&e),
                    format!("request failed: {e}"),
                );
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return LlmResponse::error(
                    Some(Provider::Anthropic),
                    LlmErrorType::Network,
                    format!("failed to read body: {e}"),
                );
            }
        };

        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return LlmResponse::error(
                Some(Provider::Anthropic),
                LlmErrorType::from_status(status),
                message,
            );
        }

        let parsed: AnthropicResponse = match serde_json::from_str(&body) {
            Ok(p) => p,
            Err(e) => {
                return LlmResponse::error(
                    Some(Provider::Anthropic),
                    LlmErrorType::Parse,
                    format!("failed to parse response: {e}"),
                );
            }
        };

        let content = parsed
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        LlmResponse::ok(
            Provider::Anthropic,
            parsed.model,
            content,
            TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
            },
            started.elapsed().as_secs_f64(),
        )
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }
}

// ---------------------------------------------------------------------------
// Scripted client
// ---------------------------------------------------------------------------

/// Client that replays a fixed script of responses.
///
/// Useful for offline operation and deterministic tests: each call pops the
/// next scripted entry, and the last entry repeats once the script runs out.
pub struct ScriptedClient {
    provider: Provider,
    script: Mutex<Vec<ScriptedReply>>,
    exhausted_reply: ScriptedReply,
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Content(String),
    Failure(LlmErrorType, String),
}

impl ScriptedClient {
    pub fn new(provider: Provider, replies: Vec<ScriptedReply>) -> Self {
        let exhausted_reply = replies
            .last()
            .cloned()
            .unwrap_or(ScriptedReply::Failure(
                LlmErrorType::Unknown,
                "script exhausted".to_string(),
            ));
        Self {
            provider,
            script: Mutex::new(replies),
            exhausted_reply,
        }
    }

    /// Client that always answers with the same content.
    pub fn always(provider: Provider, content: impl Into<String>) -> Self {
        Self::new(provider, vec![ScriptedReply::Content(content.into())])
    }

    /// Client that always fails with the given error type.
    pub fn always_failing(provider: Provider, error_type: LlmErrorType) -> Self {
        Self::new(
            provider,
            vec![ScriptedReply::Failure(error_type, "scripted failure".into())],
        )
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(&self, _request: &ChatRequest) -> LlmResponse {
        let reply = {
            let mut script = self.script.lock().expect("script lock poisoned");
            if script.len() > 1 {
                script.remove(0)
            } else {
                script
                    .first()
                    .cloned()
                    .unwrap_or_else(|| self.exhausted_reply.clone())
            }
        };

        match reply {
            ScriptedReply::Content(content) => LlmResponse::ok(
                self.provider,
                "scripted",
                content,
                TokenUsage::default(),
                0.0,
            ),
            ScriptedReply::Failure(error_type, message) => {
                LlmResponse::error(Some(self.provider), error_type, message)
            }
        }
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("key", "deepseek-chat")
            .with_base_url("https://example.com/v1")
            .with_timeouts(10, 60);

        assert_eq!(config.api_key, "key");
        assert_eq!(config.base_url.as_deref(), Some("https://example.com/v1"));
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(config.read_timeout_secs, 60);
    }

    #[test]
    fn test_compat_client_base_urls() {
        let deepseek = OpenAiCompatClient::deepseek(ClientConfig::new("k", "deepseek-chat"));
        assert!(deepseek.base_url().contains("deepseek.com"));
        assert_eq!(deepseek.provider(), Provider::DeepSeek);

        let openai = OpenAiCompatClient::openai(ClientConfig::new("k", "gpt-4o-mini"));
        assert!(openai.base_url().contains("openai.com"));
        assert_eq!(openai.provider(), Provider::OpenAi);
    }

    #[tokio::test]
    async fn test_scripted_client_replays_in_order() {
        let client = ScriptedClient::new(
            Provider::DeepSeek,
            vec![
                ScriptedReply::Content("first".into()),
                ScriptedReply::Content("second".into()),
            ],
        );
        let req = ChatRequest::from_prompt("q");
        assert_eq!(client.chat(&req).await.content, "first");
        assert_eq!(client.chat(&req).await.content, "second");
        // Last entry repeats
        assert_eq!(client.chat(&req).await.content, "second");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let client = ScriptedClient::always_failing(Provider::OpenAi, LlmErrorType::RateLimit);
        let response = client.chat(&ChatRequest::from_prompt("q")).await;
        assert!(response.is_error());
        assert_eq!(response.error_type, Some(LlmErrorType::RateLimit));
    }
}
