//! LLM provider multiplexing: clients, routing, caching, lenient parsing.
//!
//! The multiplexer is the cognitive core's only external dependency model:
//! every other component reaches the outside world either through here or
//! through the tool registry.

pub mod cache;
pub mod client;
pub mod json;
pub mod multiplexer;
pub mod types;

pub use cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
pub use client::{
    AnthropicClient, ClientConfig, LlmClient, OpenAiCompatClient, ScriptedClient, ScriptedReply,
};
pub use json::{extract_json_object, parse_lenient};
pub use multiplexer::{LlmMultiplexer, MultiplexerConfig, MultiplexerStats, ProviderStatus};
pub use types::{
    ChatMessage, ChatRequest, ChatRole, CostTracker, LlmErrorType, LlmResponse, Provider,
    ProviderCosts, TokenUsage,
};
