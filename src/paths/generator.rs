//! Candidate path generation.
//!
//! LLM-assisted when a provider is reachable, with a static-template
//! rendition of the same vocabulary as fallback. Whatever the source,
//! `strategy_id` assignment is deterministic: the declared `path_type` is
//! normalized and anything outside the vocabulary is discarded.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{parse_lenient, LlmMultiplexer};

use super::types::{ReasoningPath, STRATEGY_VOCABULARY};

/// Default number of candidate paths per decision.
pub const DEFAULT_MAX_PATHS: usize = 6;

/// Generates candidate `ReasoningPath` sets from a thinking seed.
pub struct PathGenerator {
    llm: Arc<LlmMultiplexer>,
}

#[derive(Debug, Deserialize)]
struct GeneratedPathSet {
    paths: Vec<GeneratedPath>,
}

#[derive(Debug, Deserialize)]
struct GeneratedPath {
    path_type: String,
    description: String,
    #[serde(default)]
    prompt_template: Option<String>,
}

impl PathGenerator {
    pub fn new(llm: Arc<LlmMultiplexer>) -> Self {
        Self { llm }
    }

    /// Produce between 1 and `max_paths` distinct candidate paths.
    pub async fn generate_paths(
        &self,
        thinking_seed: &str,
        query: &str,
        max_paths: usize,
    ) -> Vec<ReasoningPath> {
        let max_paths = max_paths.max(1);

        if self.llm.has_clients() {
            let prompt = Self::build_prompt(thinking_seed, query, max_paths);
            let response = self.llm.prompt(&prompt, 0.7, 1200).await;
            if response.success {
                let paths = Self::parse_generated(&response.content, max_paths);
                if !paths.is_empty() {
                    debug!(count = paths.len(), "generated paths via LLM");
                    return paths;
                }
                warn!("LLM path generation unparseable, using static templates");
            } else {
                warn!("LLM path generation failed, using static templates");
            }
        }

        Self::static_paths(query, max_paths)
    }

    fn build_prompt(thinking_seed: &str, query: &str, max_paths: usize) -> String {
        let vocabulary = STRATEGY_VOCABULARY.join(", ");
        format!(
            "You design candidate reasoning strategies for a decision engine.\n\
             \n\
             Query: {query}\n\
             Framing: {thinking_seed}\n\
             \n\
             Propose up to {max_paths} distinct strategies. Each `path_type` MUST be one of:\n\
             {vocabulary}\n\
             \n\
             Answer with strict JSON only:\n\
             {{\"paths\": [{{\"path_type\": \"...\", \"description\": \"one sentence on how this \
             strategy attacks the query\", \"prompt_template\": \"short working instruction\"}}]}}"
        )
    }

    /// Parse the LLM reply, keeping only vocabulary families and deduping by
    /// `strategy_id`.
    fn parse_generated(content: &str, max_paths: usize) -> Vec<ReasoningPath> {
        let Some(set) = parse_lenient::<GeneratedPathSet>(content) else {
            return Vec::new();
        };

        let vocabulary: HashSet<&str> = STRATEGY_VOCABULARY.into_iter().collect();
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for raw in set.paths {
            let path = ReasoningPath::new(
                raw.path_type.trim(),
                raw.description.trim(),
                raw.prompt_template
                    .as_deref()
                    .unwrap_or("Apply this strategy to the query")
                    .trim(),
            );
            if !vocabulary.contains(path.strategy_id.as_str()) {
                debug!(path_type = %path.path_type, "dropping off-vocabulary path");
                continue;
            }
            if !seen.insert(path.strategy_id.clone()) {
                continue;
            }
            paths.push(path);
            if paths.len() >= max_paths {
                break;
            }
        }
        paths
    }

    /// Static rendition of the vocabulary, used when the LLM is out.
    pub fn static_paths(query: &str, max_paths: usize) -> Vec<ReasoningPath> {
        let templates: [(&str, String); 6] = [
            (
                "systematic_analytical",
                format!("Decompose '{query}' into parts and analyze each with structured logic"),
            ),
            (
                "exploratory_investigative",
                format!("Gather external information about '{query}' before committing to an answer"),
            ),
            (
                "critical_questioning",
                format!("Challenge the assumptions behind '{query}' and verify claims"),
            ),
            (
                "practical_pragmatic",
                format!("Find the most direct workable answer to '{query}'"),
            ),
            (
                "creative_innovative",
                format!("Approach '{query}' from an unconventional angle"),
            ),
            (
                "holistic_comprehensive",
                format!("Consider '{query}' in its wider context and weigh all aspects together"),
            ),
        ];

        templates
            .into_iter()
            .take(max_paths.max(1))
            .map(|(family, description)| {
                ReasoningPath::new(family, description, "Apply this strategy to the query")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MultiplexerConfig, Provider, ScriptedClient};

    fn offline_generator() -> PathGenerator {
        PathGenerator::new(Arc::new(LlmMultiplexer::new(MultiplexerConfig::default())))
    }

    fn fast_mux(client: ScriptedClient) -> Arc<LlmMultiplexer> {
        Arc::new(
            LlmMultiplexer::new(MultiplexerConfig {
                request_interval_ms: 0,
                retry_base_delay_ms: 0,
                max_retries: 1,
                ..MultiplexerConfig::default()
            })
            .with_client(Arc::new(client)),
        )
    }

    #[tokio::test]
    async fn test_offline_generation_uses_static_vocabulary() {
        let generator = offline_generator();
        let paths = generator.generate_paths("seed", "query", 6).await;

        assert_eq!(paths.len(), 6);
        let ids: Vec<&str> = paths.iter().map(|p| p.strategy_id.as_str()).collect();
        assert!(ids.contains(&"systematic_analytical"));
        assert!(ids.contains(&"creative_innovative"));
    }

    #[tokio::test]
    async fn test_max_paths_respected() {
        let generator = offline_generator();
        let paths = generator.generate_paths("seed", "query", 2).await;
        assert_eq!(paths.len(), 2);

        // Zero is coerced to one; the contract is 1..=max
        let paths = generator.generate_paths("seed", "query", 0).await;
        assert_eq!(paths.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_generation_filters_vocabulary_and_dedupes() {
        let reply = r#"{"paths": [
            {"path_type": "systematic_analytical", "description": "structured"},
            {"path_type": "Systematic Analytical", "description": "duplicate family"},
            {"path_type": "quantum_vibes", "description": "not in vocabulary"},
            {"path_type": "critical_questioning", "description": "challenge"}
        ]}"#;
        let generator = PathGenerator::new(fast_mux(ScriptedClient::always(
            Provider::DeepSeek,
            reply,
        )));

        let paths = generator.generate_paths("seed", "query", 6).await;
        let ids: Vec<&str> = paths.iter().map(|p| p.strategy_id.as_str()).collect();
        assert_eq!(ids, vec!["systematic_analytical", "critical_questioning"]);
    }

    #[tokio::test]
    async fn test_unparseable_llm_output_falls_back_to_static() {
        let generator = PathGenerator::new(fast_mux(ScriptedClient::always(
            Provider::DeepSeek,
            "no json to be found here",
        )));

        let paths = generator.generate_paths("seed", "query", 4).await;
        assert_eq!(paths.len(), 4);
        assert_eq!(paths[0].strategy_id, "systematic_analytical");
    }

    #[tokio::test]
    async fn test_instance_ids_unique_per_generation() {
        let generator = offline_generator();
        let first = generator.generate_paths("seed", "query", 3).await;
        let second = generator.generate_paths("seed", "query", 3).await;

        assert_eq!(first[0].strategy_id, second[0].strategy_id);
        assert_ne!(first[0].instance_id, second[0].instance_id);
    }
}
