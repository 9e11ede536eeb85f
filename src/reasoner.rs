//! Prior reasoner: fast query triage and thinking-seed generation.
//!
//! LLM-first with a keyword-heuristic fallback. The triage result feeds the
//! rest of the pipeline; the thinking seed is a short prose framing of the
//! query composed purely from triage fields.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::llm::{parse_lenient, LlmMultiplexer};

/// Coarse routing class for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    /// Answer directly, no tools
    DirectResponse,
    /// One or more tool calls expected
    ToolWorkflow,
    /// Multi-step reasoning over gathered information
    DeepReasoning,
}

/// Triage of one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Triage {
    /// Complexity in [0, 1]
    pub complexity: f64,
    pub domain: String,
    pub intent: String,
    /// Urgency in [0, 1]
    pub urgency: f64,
    pub route_strategy: RouteStrategy,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    /// True when the LLM contributed to this triage
    pub llm_assisted: bool,
}

#[derive(Debug, Deserialize)]
struct LlmTriage {
    complexity: f64,
    domain: String,
    intent: String,
    #[serde(default = "default_urgency")]
    urgency: f64,
    route_strategy: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

fn default_urgency() -> f64 {
    0.3
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|thanks|thank you|你好|您好|谢谢)\b|^\s*(你好|您好|谢谢)")
        .expect("invalid regex")
});

static TECHNICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(code|rust|python|api|debug|error|compile|deploy|database|async|算法|代码|编程)")
        .expect("invalid regex")
});

static RESEARCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(what|how|why|where|when|who|latest|news|compare|research|什么|如何|为什么|哪里|最新|哪些)")
        .expect("invalid regex")
});

static CREATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(write|design|imagine|story|poem|brainstorm|create|draw|画|设计|创作|写)")
        .expect("invalid regex")
});

static URGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(urgent|asap|now|immediately|quickly|紧急|马上|立刻)").expect("invalid regex")
});

static COMPLEX_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(architect|trade.?off|multi|across|system|integrate|optimi[sz]e|架构|系统|优化)")
        .expect("invalid regex")
});

/// Fast query triage with LLM-first classification.
pub struct PriorReasoner {
    llm: Arc<LlmMultiplexer>,
}

impl PriorReasoner {
    pub fn new(llm: Arc<LlmMultiplexer>) -> Self {
        Self { llm }
    }

    /// Classify the query and pick a routing class.
    ///
    /// Tries the LLM with a strict-JSON prompt at low temperature; malformed
    /// or missing output falls back to the keyword heuristics. When both
    /// succeed the confidences are merged, penalized on disagreement.
    pub async fn classify_and_route(
        &self,
        query: &str,
        _ctx: &HashMap<String, serde_json::Value>,
    ) -> Triage {
        let heuristic = Self::heuristic_triage(query);

        if !self.llm.has_clients() {
            return heuristic;
        }

        let response = self.llm.prompt(&Self::triage_prompt(query), 0.1, 500).await;
        if !response.success {
            warn!("LLM triage unavailable, using heuristics");
            return heuristic;
        }

        let Some(parsed) = parse_lenient::<LlmTriage>(&response.content) else {
            warn!("LLM triage unparseable, using heuristics");
            return heuristic;
        };

        Self::merge(parsed, &heuristic)
    }

    fn triage_prompt(query: &str) -> String {
        format!(
            "Classify the following query for a decision engine.\n\
             Query: {query}\n\
             \n\
             Respond with strict JSON only:\n\
             {{\"complexity\": 0.0-1.0, \"domain\": \"technical|research|creative|general\", \
             \"intent\": \"question|task|conversation\", \"urgency\": 0.0-1.0, \
             \"route_strategy\": \"direct_response|tool_workflow|deep_reasoning\", \
             \"confidence\": 0.0-1.0, \"reasoning\": \"one sentence\"}}"
        )
    }

    fn merge(llm: LlmTriage, heuristic: &Triage) -> Triage {
        let llm_confidence = llm.confidence.clamp(0.0, 1.0);
        let mut confidence = 0.7 * llm_confidence + 0.3 * heuristic.confidence;
        let disagreement = (llm_confidence - heuristic.confidence).abs();
        if disagreement > 0.3 {
            confidence -= (0.2 * disagreement).min(0.15);
        }

        let route_strategy = match llm.route_strategy.as_str() {
            "direct_response" => RouteStrategy::DirectResponse,
            "tool_workflow" => RouteStrategy::ToolWorkflow,
            "deep_reasoning" => RouteStrategy::DeepReasoning,
            other => {
                debug!(route = other, "unknown route strategy from LLM, keeping heuristic");
                heuristic.route_strategy
            }
        };

        Triage {
            complexity: llm.complexity.clamp(0.0, 1.0),
            domain: llm.domain,
            intent: llm.intent,
            urgency: llm.urgency.clamp(0.0, 1.0),
            route_strategy,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: if llm.reasoning.is_empty() {
                heuristic.reasoning.clone()
            } else {
                llm.reasoning
            },
            llm_assisted: true,
        }
    }

    /// Keyword-heuristic triage. Pure function of the query text.
    pub fn heuristic_triage(query: &str) -> Triage {
        let trimmed = query.trim();

        if GREETING.is_match(trimmed) && trimmed.chars().count() < 20 {
            return Triage {
                complexity: 0.1,
                domain: "general".to_string(),
                intent: "conversation".to_string(),
                urgency: 0.1,
                route_strategy: RouteStrategy::DirectResponse,
                confidence: 0.85,
                reasoning: "short conversational query".to_string(),
                llm_assisted: false,
            };
        }

        let domain = if TECHNICAL.is_match(trimmed) {
            "technical"
        } else if CREATIVE.is_match(trimmed) {
            "creative"
        } else if RESEARCH.is_match(trimmed) {
            "research"
        } else {
            "general"
        };

        let informational = RESEARCH.is_match(trimmed);
        let mut complexity: f64 = 0.3;
        if COMPLEX_SHAPE.is_match(trimmed) {
            complexity += 0.3;
        }
        if trimmed.chars().count() > 120 {
            complexity += 0.2;
        }
        if informational {
            complexity += 0.1;
        }
        let complexity = complexity.min(1.0);

        let route_strategy = if complexity >= 0.7 {
            RouteStrategy::DeepReasoning
        } else if informational {
            RouteStrategy::ToolWorkflow
        } else {
            RouteStrategy::DirectResponse
        };

        Triage {
            complexity,
            domain: domain.to_string(),
            intent: if informational { "question" } else { "task" }.to_string(),
            urgency: if URGENT.is_match(trimmed) { 0.8 } else { 0.3 },
            route_strategy,
            confidence: 0.6,
            reasoning: format!("keyword triage: domain={domain}, complexity={complexity:.1}"),
            llm_assisted: false,
        }
    }

    /// Produce the thinking seed for a query.
    pub async fn get_thinking_seed(
        &self,
        query: &str,
        ctx: &HashMap<String, serde_json::Value>,
    ) -> (String, Triage) {
        let triage = self.classify_and_route(query, ctx).await;
        let seed = compose_seed(query, &triage);
        (seed, triage)
    }
}

/// Compose the thinking seed from triage fields. Pure; no side effects.
///
/// Output is a ~100-400 character prose framing, clipped on the high side.
pub fn compose_seed(query: &str, triage: &Triage) -> String {
    let shape = match triage.route_strategy {
        RouteStrategy::DirectResponse => "suited to a direct answer",
        RouteStrategy::ToolWorkflow => "likely to need external information or tools",
        RouteStrategy::DeepReasoning => "calling for multi-step reasoning",
    };
    let mut seed = format!(
        "The query \"{}\" reads as a {} {} in the {} domain, {}. \
         Estimated complexity {:.1}; triage confidence {:.2}. {}",
        clip(query, 120),
        if triage.urgency > 0.6 { "time-sensitive" } else { "routine" },
        triage.intent,
        triage.domain,
        shape,
        triage.complexity,
        triage.confidence,
        triage.reasoning
    );
    if seed.chars().count() > 400 {
        seed = clip(&seed, 400);
    }
    seed
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
