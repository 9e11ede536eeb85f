//! Bounded in-memory response cache for chat completions.
//!
//! Keys are SHA-256 digests of the normalized request (messages, sampling
//! parameters, model pin). Hits bypass routing entirely, so they consume no
//! retry or rate budget.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

use super::types::{ChatRequest, LlmResponse};

/// Cache tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for entries in seconds
    pub ttl_secs: i64,
    /// Maximum number of entries before the oldest are evicted
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 256,
        }
    }
}

/// Cache key for a normalized request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Digest the fields that determine the completion.
    ///
    /// The provider preference is deliberately excluded: a cached answer is
    /// valid regardless of which provider would have served the miss.
    pub fn for_request(request: &ChatRequest) -> Self {
        let mut hasher = Sha256::new();
        for msg in &request.messages {
            hasher.update(format!("{:?}:", msg.role).as_bytes());
            hasher.update(msg.content.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(t) = request.temperature {
            hasher.update(format!("temp:{t:.3}\n").as_bytes());
        }
        if let Some(m) = request.max_tokens {
            hasher.update(format!("max:{m}\n").as_bytes());
        }
        if let Some(model) = &request.model {
            hasher.update(b"model:");
            hasher.update(model.as_bytes());
        }
        CacheKey(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: LlmResponse,
    created_at: DateTime<Utc>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL-bounded response cache.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            config,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.ttl_secs)
    }

    /// Look up a fresh entry, recording hit/miss.
    pub fn get(&self, key: &CacheKey) -> Option<LlmResponse> {
        let hit = {
            let entries = self.entries.read().expect("cache lock poisoned");
            entries
                .get(key)
                .filter(|e| Utc::now() - e.created_at <= self.ttl())
                .map(|e| e.response.clone())
        };

        let mut stats = self.stats.write().expect("cache lock poisoned");
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    /// Store a successful response. Failures are never cached.
    pub fn put(&self, key: CacheKey, response: &LlmResponse) {
        if !response.success {
            return;
        }
        let mut entries = self.entries.write().expect("cache lock poisoned");
        if entries.len() >= self.config.max_entries {
            Self::evict_oldest(&mut entries);
        }
        entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                created_at: Utc::now(),
            },
        );
        let mut stats = self.stats.write().expect("cache lock poisoned");
        stats.entry_count = entries.len();
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, CacheEntry>) {
        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, e)| e.created_at)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest);
        }
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let now = Utc::now();
        entries.retain(|_, e| now - e.created_at <= ttl);
        let mut stats = self.stats.write().expect("cache lock poisoned");
        stats.entry_count = entries.len();
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().expect("cache lock poisoned").clone();
        stats.entry_count = self.entries.read().expect("cache lock poisoned").len();
        stats
    }
}
