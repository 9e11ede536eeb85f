//! LLM types for requests, responses, and error classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Provider {
    DeepSeek,
    OpenAi,
    Anthropic,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeepSeek => write!(f, "deepseek"),
            Self::OpenAi => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::DeepSeek),
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Classified LLM failure modes.
///
/// Authentication, parse, and invalid-request failures are never retried;
/// everything else is eligible for backoff-and-retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorType {
    Authentication,
    RateLimit,
    Server,
    Network,
    Timeout,
    Parse,
    Quota,
    InvalidRequest,
    Unknown,
}

impl LlmErrorType {
    /// Whether the multiplexer may retry after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Authentication | Self::Parse | Self::InvalidRequest
        )
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            400 => Self::InvalidRequest,
            402 => Self::Quota,
            500 | 502 | 503 | 504 => Self::Server,
            _ => Self::Unknown,
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Temperature (0.0 - 1.0)
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Pin the request to a specific provider (skips preference routing)
    pub provider: Option<Provider>,
    /// Model override for the chosen provider
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-prompt convenience constructor.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Chat completion response.
///
/// Always a value, never an error: transport and API failures are reported
/// through `success == false` plus a classified `error_type` so the pipeline
/// can degrade without unwinding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub success: bool,
    pub content: String,
    pub usage: TokenUsage,
    pub error_type: Option<LlmErrorType>,
    pub error_message: Option<String>,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    /// Wall-clock seconds spent on the winning attempt
    pub response_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl LlmResponse {
    pub fn ok(
        provider: Provider,
        model: impl Into<String>,
        content: impl Into<String>,
        usage: TokenUsage,
        response_time: f64,
    ) -> Self {
        Self {
            success: true,
            content: content.into(),
            usage,
            error_type: None,
            error_message: None,
            provider: Some(provider),
            model: Some(model.into()),
            response_time,
            timestamp: Utc::now(),
        }
    }

    pub fn error(
        provider: Option<Provider>,
        error_type: LlmErrorType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            content: String::new(),
            usage: TokenUsage::default(),
            error_type: Some(error_type),
            error_message: Some(message.into()),
            provider,
            model: None,
            response_time: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.success
    }
}

/// Aggregate cost accounting across providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub request_count: u64,
    pub failure_count: u64,
    /// Per-provider breakdown keyed by provider name
    pub by_provider: HashMap<String, ProviderCosts>,
}

/// Usage attributed to a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCosts {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub request_count: u64,
    pub failure_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one response, success or failure.
    pub fn record(&mut self, response: &LlmResponse) {
        self.request_count += 1;
        if response.success {
            self.total_prompt_tokens += response.usage.prompt_tokens;
            self.total_completion_tokens += response.usage.completion_tokens;
        } else {
            self.failure_count += 1;
        }

        if let Some(provider) = response.provider {
            let entry = self.by_provider.entry(provider.to_string()).or_default();
            entry.request_count += 1;
            if response.success {
                entry.prompt_tokens += response.usage.prompt_tokens;
                entry.completion_tokens += response.usage.completion_tokens;
            } else {
                entry.failure_count += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_retry_policy() {
        assert!(!LlmErrorType::Authentication.is_retryable());
        assert!(!LlmErrorType::Parse.is_retryable());
        assert!(!LlmErrorType::InvalidRequest.is_retryable());
        assert!(LlmErrorType::RateLimit.is_retryable());
        assert!(LlmErrorType::Server.is_retryable());
        assert!(LlmErrorType::Timeout.is_retryable());
    }

    #[test]
    fn test_error_type_from_status() {
        assert_eq!(LlmErrorType::from_status(401), LlmErrorType::Authentication);
        assert_eq!(LlmErrorType::from_status(429), LlmErrorType::RateLimit);
        assert_eq!(LlmErrorType::from_status(400), LlmErrorType::InvalidRequest);
        assert_eq!(LlmErrorType::from_status(503), LlmErrorType::Server);
        assert_eq!(LlmErrorType::from_status(418), LlmErrorType::Unknown);
    }

    #[test]
    fn test_chat_request_builder() {
        let req = ChatRequest::new()
            .with_message(ChatMessage::user("Hi"))
            .with_temperature(1.7)
            .with_max_tokens(256)
            .with_provider(Provider::DeepSeek);

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.temperature, Some(1.0)); // clamped
        assert_eq!(req.max_tokens, Some(256));
        assert_eq!(req.provider, Some(Provider::DeepSeek));
    }

    #[test]
    fn test_cost_tracker_records_failures_separately() {
        let mut tracker = CostTracker::new();
        let ok = LlmResponse::ok(
            Provider::DeepSeek,
            "deepseek-chat",
            "hello",
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            0.2,
        );
        let err = LlmResponse::error(
            Some(Provider::DeepSeek),
            LlmErrorType::Server,
            "boom",
        );

        tracker.record(&ok);
        tracker.record(&err);

        assert_eq!(tracker.request_count, 2);
        assert_eq!(tracker.failure_count, 1);
        assert_eq!(tracker.total_prompt_tokens, 10);
        let per = tracker.by_provider.get("deepseek").unwrap();
        assert_eq!(per.request_count, 2);
        assert_eq!(per.failure_count, 1);
    }

    #[test]
    fn test_provider_round_trip() {
        for p in [Provider::DeepSeek, Provider::OpenAi, Provider::Anthropic] {
            let parsed: Provider = p.to_string().parse().unwrap();
            assert_eq!(parsed, p);
        }
        assert!("mistral".parse::<Provider>().is_err());
    }
}
