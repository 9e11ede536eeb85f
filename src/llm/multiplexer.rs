//! Provider multiplexer: routing, health, fallback, and retry.
//!
//! The multiplexer presents one `chat_completion` surface over any number of
//! registered provider clients. Callers never see an `Err`: when every
//! provider fails, the final classified error response is returned and the
//! pipeline degrades from there.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::cache::{CacheConfig, CacheKey, CacheStats, ResponseCache};
use super::client::LlmClient;
use super::types::{ChatRequest, CostTracker, LlmErrorType, LlmResponse, Provider};

/// Multiplexer tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    /// Provider tried first when the request does not pin one; `None` = auto
    pub primary_provider: Option<Provider>,
    /// Ordered fallback preference after the primary
    pub fallback_providers: Vec<Provider>,
    /// Attempts per provider before falling through
    pub max_retries: u32,
    /// Minimum interval between requests to one provider, in milliseconds
    pub request_interval_ms: u64,
    /// Consecutive errors before a provider is marked unhealthy
    pub unhealthy_after: u32,
    /// Seconds an unhealthy provider stays benched before a probe re-enables it
    pub health_probe_interval_secs: u64,
    /// Base delay for exponential backoff, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Response cache; `None` disables caching
    pub cache: Option<CacheConfig>,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            primary_provider: None,
            fallback_providers: Vec::new(),
            max_retries: 3,
            request_interval_ms: 1000,
            unhealthy_after: 3,
            health_probe_interval_secs: 300,
            retry_base_delay_ms: 500,
            cache: Some(CacheConfig::default()),
        }
    }
}

/// Mutable per-provider bookkeeping.
#[derive(Debug)]
struct ProviderState {
    healthy: bool,
    consecutive_errors: u32,
    last_error: Option<String>,
    benched_at: Option<Instant>,
    last_request_at: Option<Instant>,
}

impl ProviderState {
    fn new() -> Self {
        Self {
            healthy: true,
            consecutive_errors: 0,
            last_error: None,
            benched_at: None,
            last_request_at: None,
        }
    }
}

/// Read-only snapshot of one provider's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    pub healthy: bool,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

/// Aggregate multiplexer counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiplexerStats {
    pub total_requests: u64,
    pub fallback_count: u64,
    pub cache: Option<CacheStats>,
    pub costs: CostTracker,
}

/// Uniform chat-completion abstraction over N providers.
pub struct LlmMultiplexer {
    config: MultiplexerConfig,
    clients: Vec<Arc<dyn LlmClient>>,
    states: HashMap<Provider, Mutex<ProviderState>>,
    cache: Option<ResponseCache>,
    costs: RwLock<CostTracker>,
    total_requests: AtomicU64,
    fallback_count: AtomicU64,
}

impl LlmMultiplexer {
    pub fn new(config: MultiplexerConfig) -> Self {
        let cache = config.cache.clone().map(ResponseCache::new);
        Self {
            config,
            clients: Vec::new(),
            states: HashMap::new(),
            cache,
            costs: RwLock::new(CostTracker::new()),
            total_requests: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        }
    }

    /// Register a provider client. Registration order is the auto-routing order.
    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        let provider = client.provider();
        if !self.states.contains_key(&provider) {
            self.states.insert(provider, Mutex::new(ProviderState::new()));
            self.clients.push(client);
        }
        self
    }

    /// Whether any provider is registered at all.
    pub fn has_clients(&self) -> bool {
        !self.clients.is_empty()
    }

    /// Run a chat completion with routing, retry, and fallback.
    pub async fn chat_completion(&self, request: &ChatRequest) -> LlmResponse {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if self.clients.is_empty() {
            return LlmResponse::error(
                None,
                LlmErrorType::Unknown,
                "no providers registered",
            );
        }

        let cache_key = self.cache.as_ref().map(|c| {
            let key = CacheKey::for_request(request);
            (c, key)
        });
        if let Some((cache, key)) = &cache_key {
            if let Some(hit) = cache.get(key) {
                debug!(key = %&key.0[..12], "llm cache hit");
                return hit;
            }
        }

        let order = self.routing_order(request.provider);
        let mut last_response: Option<LlmResponse> = None;

        for (rank, provider) in order.iter().enumerate() {
            let Some(client) = self.client_for(*provider) else {
                continue;
            };
            if rank > 0 {
                self.fallback_count.fetch_add(1, Ordering::Relaxed);
                info!(provider = %provider, "falling back to next provider");
            }

            let response = self.call_with_retries(client.as_ref(), request).await;
            if response.success {
                if let Some((cache, key)) = &cache_key {
                    cache.put(key.clone(), &response);
                }
                return response;
            }
            last_response = Some(response);
        }

        warn!("all providers failed for chat completion");
        last_response.unwrap_or_else(|| {
            LlmResponse::error(None, LlmErrorType::Unknown, "no provider available")
        })
    }

    /// Single-prompt convenience wrapper.
    pub async fn prompt(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> LlmResponse {
        let request = ChatRequest::from_prompt(prompt)
            .with_temperature(temperature)
            .with_max_tokens(max_tokens);
        self.chat_completion(&request).await
    }

    /// Providers in the order they will be tried for this request.
    fn routing_order(&self, pinned: Option<Provider>) -> Vec<Provider> {
        let mut order = Vec::new();
        let mut push = |p: Provider, order: &mut Vec<Provider>| {
            if !order.contains(&p) && self.states.contains_key(&p) {
                order.push(p);
            }
        };

        if let Some(p) = pinned {
            if self.is_usable(p) {
                push(p, &mut order);
            }
        }
        if let Some(p) = self.config.primary_provider {
            if self.is_usable(p) {
                push(p, &mut order);
            }
        }
        for p in &self.config.fallback_providers {
            if self.is_usable(*p) {
                push(*p, &mut order);
            }
        }
        for client in &self.clients {
            let p = client.provider();
            if self.is_usable(p) {
                push(p, &mut order);
            }
        }
        // Everything is benched: try the full set anyway rather than give up
        if order.is_empty() {
            for client in &self.clients {
                push(client.provider(), &mut order);
            }
        }
        order
    }

    fn client_for(&self, provider: Provider) -> Option<Arc<dyn LlmClient>> {
        self.clients
            .iter()
            .find(|c| c.provider() == provider)
            .cloned()
    }

    /// Healthy, or unhealthy but due for a probe (which re-enables it).
    fn is_usable(&self, provider: Provider) -> bool {
        let Some(state) = self.states.get(&provider) else {
            return false;
        };
        let mut state = state.lock().expect("provider state poisoned");
        if state.healthy {
            return true;
        }
        let probe_due = state
            .benched_at
            .map(|t| t.elapsed() >= Duration::from_secs(self.config.health_probe_interval_secs))
            .unwrap_or(true);
        if probe_due {
            info!(provider = %provider, "health probe window reached, re-enabling provider");
            state.healthy = true;
            state.consecutive_errors = 0;
            state.benched_at = None;
            return true;
        }
        false
    }

    async fn call_with_retries(
        &self,
        client: &dyn LlmClient,
        request: &ChatRequest,
    ) -> LlmResponse {
        let provider = client.provider();
        let mut last = LlmResponse::error(
            Some(provider),
            LlmErrorType::Unknown,
            "no attempt made",
        );

        for attempt in 0..self.config.max_retries.max(1) {
            self.enforce_request_interval(provider).await;

            let response = client.chat(request).await;
            self.record_outcome(provider, &response);

            if response.success {
                return response;
            }

            let error_type = response.error_type.unwrap_or(LlmErrorType::Unknown);
            debug!(
                provider = %provider,
                attempt,
                ?error_type,
                "provider attempt failed"
            );
            last = response;

            if !error_type.is_retryable() || attempt + 1 >= self.config.max_retries.max(1) {
                break;
            }
            tokio::time::sleep(self.retry_delay(error_type, attempt)).await;
        }
        last
    }

    /// Exponential backoff with jitter; rate limits back off twice as hard.
    fn retry_delay(&self, error_type: LlmErrorType, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay_ms as f64;
        let mut delay = base * 2f64.powi(attempt as i32);
        if error_type == LlmErrorType::RateLimit {
            delay *= 2.0;
        }
        let jitter = 1.0 + rand::thread_rng().gen::<f64>() * 0.25;
        Duration::from_millis((delay * jitter) as u64)
    }

    /// Sleep out the remainder of the per-provider minimum request interval.
    async fn enforce_request_interval(&self, provider: Provider) {
        let interval = Duration::from_millis(self.config.request_interval_ms);
        if interval.is_zero() {
            return;
        }
        let wait = {
            let Some(state) = self.states.get(&provider) else {
                return;
            };
            let mut state = state.lock().expect("provider state poisoned");
            let wait = state
                .last_request_at
                .map(|t| interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO);
            state.last_request_at = Some(Instant::now());
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    fn record_outcome(&self, provider: Provider, response: &LlmResponse) {
        {
            let mut costs = self.costs.write().expect("cost lock poisoned");
            costs.record(response);
        }
        let Some(state) = self.states.get(&provider) else {
            return;
        };
        let mut state = state.lock().expect("provider state poisoned");
        if response.success {
            state.consecutive_errors = 0;
            state.healthy = true;
            state.benched_at = None;
            state.last_error = None;
        } else {
            state.consecutive_errors += 1;
            state.last_error = response.error_message.clone();
            if state.consecutive_errors >= self.config.unhealthy_after {
                if state.healthy {
                    warn!(
                        provider = %provider,
                        errors = state.consecutive_errors,
                        "marking provider unhealthy"
                    );
                }
                state.healthy = false;
                state.benched_at = Some(Instant::now());
            }
        }
    }

    /// Health snapshot for every registered provider.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.clients
            .iter()
            .map(|c| {
                let provider = c.provider();
                let state = self.states[&provider]
                    .lock()
                    .expect("provider state poisoned");
                ProviderStatus {
                    provider,
                    healthy: state.healthy,
                    consecutive_errors: state.consecutive_errors,
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    pub fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
            cache: self.cache.as_ref().map(|c| c.stats()),
            costs: self.costs.read().expect("cost lock poisoned").clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{ScriptedClient, ScriptedReply};

    fn fast_config() -> MultiplexerConfig {
        MultiplexerConfig {
            request_interval_ms: 0,
            retry_base_delay_ms: 0,
            max_retries: 2,
            ..MultiplexerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_no_providers_yields_error_response() {
        let mux = LlmMultiplexer::new(fast_config());
        let response = mux.chat_completion(&ChatRequest::from_prompt("q")).await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let mux = LlmMultiplexer::new(fast_config())
            .with_client(Arc::new(ScriptedClient::always_failing(
                Provider::DeepSeek,
                LlmErrorType::Server,
            )))
            .with_client(Arc::new(ScriptedClient::always(
                Provider::OpenAi,
                "rescued",
            )));

        let response = mux.chat_completion(&ChatRequest::from_prompt("q")).await;
        assert!(response.success);
        assert_eq!(response.provider, Some(Provider::OpenAi));
        assert_eq!(mux.stats().fallback_count, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_skips_retries() {
        let mux = LlmMultiplexer::new(MultiplexerConfig {
            max_retries: 3,
            ..fast_config()
        })
        .with_client(Arc::new(ScriptedClient::always_failing(
            Provider::DeepSeek,
            LlmErrorType::Authentication,
        )));

        let response = mux.chat_completion(&ChatRequest::from_prompt("q")).await;
        assert!(response.is_error());
        // One attempt only: auth errors are never retried
        assert_eq!(mux.stats().costs.request_count, 1);
    }

    #[tokio::test]
    async fn test_provider_marked_unhealthy_after_threshold() {
        let mux = LlmMultiplexer::new(MultiplexerConfig {
            unhealthy_after: 2,
            max_retries: 2,
            ..fast_config()
        })
        .with_client(Arc::new(ScriptedClient::always_failing(
            Provider::DeepSeek,
            LlmErrorType::Server,
        )));

        let _ = mux.chat_completion(&ChatRequest::from_prompt("q")).await;
        let status = &mux.provider_status()[0];
        assert!(!status.healthy);
        assert!(status.consecutive_errors >= 2);
    }

    #[tokio::test]
    async fn test_pinned_provider_used_when_healthy() {
        let mux = LlmMultiplexer::new(fast_config())
            .with_client(Arc::new(ScriptedClient::always(Provider::DeepSeek, "a")))
            .with_client(Arc::new(ScriptedClient::always(Provider::Anthropic, "b")));

        let request = ChatRequest::from_prompt("q").with_provider(Provider::Anthropic);
        let response = mux.chat_completion(&request).await;
        assert_eq!(response.provider, Some(Provider::Anthropic));
        assert_eq!(response.content, "b");
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let client = Arc::new(ScriptedClient::new(
            Provider::DeepSeek,
            vec![
                ScriptedReply::Content("first".into()),
                ScriptedReply::Content("second".into()),
            ],
        ));
        let mux = LlmMultiplexer::new(fast_config()).with_client(client);

        let request = ChatRequest::from_prompt("same question");
        let first = mux.chat_completion(&request).await;
        let second = mux.chat_completion(&request).await;

        assert_eq!(first.content, "first");
        // Cached: the script never advances to "second"
        assert_eq!(second.content, "first");
        assert_eq!(mux.stats().cache.unwrap().hits, 1);
    }

    #[tokio::test]
    async fn test_success_resets_health() {
        let client = Arc::new(ScriptedClient::new(
            Provider::DeepSeek,
            vec![
                ScriptedReply::Failure(LlmErrorType::Server, "down".into()),
                ScriptedReply::Content("up again".into()),
            ],
        ));
        let mux = LlmMultiplexer::new(MultiplexerConfig {
            max_retries: 2,
            ..fast_config()
        })
        .with_client(client);

        let response = mux.chat_completion(&ChatRequest::from_prompt("q")).await;
        assert!(response.success);
        assert!(mux.provider_status()[0].healthy);
        assert_eq!(mux.provider_status()[0].consecutive_errors, 0);
    }
}
