//! Strategy interpreter: turns a chosen reasoning path into an executable
//! plan.
//!
//! The primary algorithm asks the LLM to arbitrate between a direct answer
//! and tool use; when the LLM is unavailable or unparseable, a layered
//! heuristic fallback takes over, ending with per-strategy playbooks.

pub mod visual;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::llm::{parse_lenient, LlmMultiplexer};
use crate::paths::{ReasoningPath, CREATIVE_DETOUR};
use crate::tools::ToolRegistry;

pub use visual::{decide_visual, RiskLevel, VisualDecision, VisualOpportunity};

/// Name of the image tool that triggers the visual-intelligence gate.
pub const IMAGE_TOOL: &str = "image_generation";

/// One tool invocation in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub tool_input: Value,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_input,
        }
    }
}

/// Executable output of the interpreter.
///
/// A valid plan has a non-empty `thought` and exactly one of `final_answer`
/// or a non-empty `actions` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub thought: String,
    pub final_answer: Option<String>,
    pub actions: Vec<Action>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub metadata: HashMap<String, Value>,
}

impl Plan {
    pub fn direct(thought: impl Into<String>, answer: impl Into<String>, confidence: f64) -> Self {
        Self {
            thought: thought.into(),
            final_answer: Some(answer.into()),
            actions: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    pub fn with_actions(
        thought: impl Into<String>,
        actions: Vec<Action>,
        confidence: f64,
    ) -> Self {
        Self {
            thought: thought.into(),
            final_answer: None,
            actions,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: HashMap::new(),
        }
    }

    pub fn is_direct_answer(&self) -> bool {
        self.final_answer.is_some()
    }

    /// Structural validity: thought present, answer XOR actions.
    pub fn is_well_formed(&self) -> bool {
        !self.thought.trim().is_empty()
            && (self.final_answer.as_deref().map(|a| !a.trim().is_empty()).unwrap_or(false)
                ^ !self.actions.is_empty())
    }
}

/// LLM arbiter reply shape.
#[derive(Debug, Deserialize)]
struct ArbiterDecision {
    needs_tools: bool,
    #[serde(default)]
    recommended_tools: Vec<String>,
    #[serde(default)]
    tool_reasoning: String,
    #[serde(default)]
    direct_answer: String,
    #[serde(default)]
    explanation: String,
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey)\b|你好|您好|早上好|下午好|晚上好").expect("invalid regex")
});
static THANKS: &[&str] = &["谢谢", "感谢", "thanks", "thank you"];
static SELF_INTRO: &[&str] = &[
    "你是谁", "介绍一下你自己", "自我介绍", "介绍自己", "who are you", "introduce yourself",
];
static CAPABILITIES: &[&str] = &[
    "你能做什么", "你有什么功能", "你会什么", "你的能力", "what can you do", "your capabilities",
];

static INFORMATIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(what|how|why|where|when|who|latest|info(rmation)?)\b|什么|如何|怎么|为什么|哪里|何时|最新|信息|资料|哪些",
    )
    .expect("invalid regex")
});

static WANTS_DETAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)detail|具体|详细").expect("invalid regex"));

static WANTS_LATEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)latest|recent|最新").expect("invalid regex"));

/// Translates chosen strategies into concrete plans.
pub struct StrategyInterpreter {
    llm: Arc<LlmMultiplexer>,
    tools: Arc<ToolRegistry>,
}

impl StrategyInterpreter {
    pub fn new(llm: Arc<LlmMultiplexer>, tools: Arc<ToolRegistry>) -> Self {
        Self { llm, tools }
    }

    /// Produce a plan for the chosen path.
    pub async fn interpret(
        &self,
        chosen: &ReasoningPath,
        query: &str,
        thinking_seed: &str,
    ) -> Plan {
        let mut plan = self.interpret_inner(chosen, query, thinking_seed).await;

        plan.metadata
            .insert("strategy_id".to_string(), json!(chosen.strategy_id));
        plan.metadata
            .insert("path_type".to_string(), json!(chosen.path_type));
        plan.metadata
            .insert("instance_id".to_string(), json!(chosen.instance_id));

        if !plan.is_well_formed() {
            warn!("interpreter produced an invalid plan, replacing with safe direct answer");
            let mut safe = Plan::direct(
                "Plan validation failed, answering directly",
                apology_answer(query),
                0.2,
            );
            safe.metadata = plan.metadata;
            safe.metadata.insert("invalid_plan".to_string(), json!(true));
            return safe;
        }
        plan
    }

    async fn interpret_inner(
        &self,
        chosen: &ReasoningPath,
        query: &str,
        thinking_seed: &str,
    ) -> Plan {
        if self.llm.has_clients() {
            let prompt = self.build_arbiter_prompt(chosen, query, thinking_seed);
            let response = self.llm.prompt(&prompt, 0.3, 1000).await;
            if response.success {
                if let Some(decision) = parse_lenient::<ArbiterDecision>(&response.content) {
                    if let Some(plan) = self.plan_from_arbiter(decision, chosen, query) {
                        return plan;
                    }
                } else {
                    debug!("arbiter reply unparseable, falling back to heuristics");
                }
            }
        }
        self.heuristic_plan(chosen, query)
    }

    fn build_arbiter_prompt(
        &self,
        chosen: &ReasoningPath,
        query: &str,
        thinking_seed: &str,
    ) -> String {
        let catalog = self.tools.catalog();
        let tool_lines = if catalog.is_empty() {
            "(no tools registered)".to_string()
        } else {
            catalog
                .iter()
                .map(|(name, description)| format!("- {name}: {description}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "You are the final decision arbiter for an assistant.\n\
             \n\
             User query: {query}\n\
             Chosen strategy: {} - {}\n\
             Framing: {thinking_seed}\n\
             \n\
             Available tools:\n{tool_lines}\n\
             \n\
             Decide whether tools are needed. Greetings, thanks, and small talk \
             never need tools, whatever the strategy says. Reply with strict JSON only:\n\
             {{\"needs_tools\": true|false, \"recommended_tools\": [\"...\"], \
             \"tool_reasoning\": \"...\", \"direct_answer\": \"natural answer when no \
             tools are needed\", \"explanation\": \"...\"}}",
            chosen.path_type, chosen.description
        )
    }

    /// Convert a parsed arbiter decision into a plan, or `None` when it is
    /// unusable and heuristics should take over.
    fn plan_from_arbiter(
        &self,
        decision: ArbiterDecision,
        chosen: &ReasoningPath,
        query: &str,
    ) -> Option<Plan> {
        if decision.needs_tools {
            let mut actions = Vec::new();
            let mut dropped = 0usize;
            for tool in &decision.recommended_tools {
                if !self.tools.has_tool(tool) {
                    info!(tool = %tool, "arbiter recommended unregistered tool, dropping");
                    dropped += 1;
                    continue;
                }
                if tool == IMAGE_TOOL {
                    let visual = decide_visual(query, &HashMap::new());
                    if !visual.should_generate {
                        info!(reason = %visual.reason, "visual gate vetoed image generation");
                        dropped += 1;
                        continue;
                    }
                    actions.push(image_action(query, &visual));
                    continue;
                }
                actions.push(Action::new(tool, tool_input(tool, query, chosen)));
            }

            if actions.is_empty() {
                if dropped > 0 && !decision.direct_answer.trim().is_empty() {
                    // Every recommended tool was dropped: fold to direct
                    return Some(Plan::direct(
                        decision.explanation,
                        decision.direct_answer,
                        0.5,
                    ));
                }
                return None;
            }

            let thought = if decision.tool_reasoning.trim().is_empty() {
                format!("Executing the '{}' strategy with tools", chosen.path_type)
            } else {
                decision.tool_reasoning
            };
            return Some(Plan::with_actions(thought, actions, 0.75));
        }

        let answer = decision.direct_answer.trim();
        if answer.is_empty() {
            return None;
        }
        let thought = if decision.explanation.trim().is_empty() {
            format!("The '{}' strategy resolves this directly", chosen.path_type)
        } else {
            decision.explanation
        };
        Some(Plan::direct(thought, answer, 0.8))
    }

    /// Layered heuristic fallback: curated conversational answers, then
    /// informational search, then the per-strategy playbook.
    fn heuristic_plan(&self, chosen: &ReasoningPath, query: &str) -> Plan {
        let trimmed = query.trim();
        let lowered = trimmed.to_lowercase();

        if GREETING.is_match(trimmed) && trimmed.chars().count() < 20 {
            return Plan::direct(
                "Greeting detected, no tools needed",
                "你好！我是一个智能决策助手，很高兴为您服务。有什么我可以帮助您的吗？",
                0.9,
            );
        }
        if matches_any(&lowered, THANKS) {
            return Plan::direct(
                "Thanks detected, no tools needed",
                "不客气！如果还有其他问题，随时可以问我。You're welcome!",
                0.9,
            );
        }
        if matches_any(&lowered, SELF_INTRO) {
            return Plan::direct(
                "Self-introduction request",
                "你好！我是一个基于多策略认知架构的智能助手。我会为每个问题挑选合适的思考策略，\
                 并在需要时调用搜索、验证等工具来给出可靠的回答。",
                0.85,
            );
        }
        if matches_any(&lowered, CAPABILITIES) {
            return Plan::direct(
                "Capability question",
                "我可以帮您：搜索和整理信息、验证想法的可行性、分析和比较方案、回答各类问题。\
                 我会根据问题自动选择合适的思考方式。",
                0.85,
            );
        }

        if INFORMATIONAL.is_match(trimmed) && self.tools.has_tool("web_search") {
            let refined = refine_search_query(query, chosen);
            return Plan::with_actions(
                format!(
                    "Information need detected; searching under the '{}' strategy",
                    chosen.path_type
                ),
                vec![Action::new("web_search", json!({ "query": refined }))],
                0.7,
            );
        }

        self.playbook_plan(chosen, query)
    }

    /// Per-strategy specialization when nothing above decided.
    fn playbook_plan(&self, chosen: &ReasoningPath, query: &str) -> Plan {
        let strategy = chosen.strategy_id.as_str();

        let search = |refinement: String| {
            self.tools.has_tool("web_search").then(|| {
                Plan::with_actions(
                    format!("'{}' strategy routes through search", chosen.path_type),
                    vec![Action::new("web_search", json!({ "query": refinement }))],
                    0.6,
                )
            })
        };

        let planned = match strategy {
            "exploratory_investigative" => search(query.to_string()),
            "systematic_analytical" => search(format!("{query} analysis")),
            CREATIVE_DETOUR => search(format!("alternative approaches to {query}")),
            "critical_questioning" => self.tools.has_tool("idea_verification").then(|| {
                Plan::with_actions(
                    "Critical strategy verifies the core claim first",
                    vec![Action::new(
                        "idea_verification",
                        json!({ "idea_text": format!("Claim under review for '{query}': {}", chosen.description) }),
                    )],
                    0.6,
                )
            }),
            "practical_pragmatic" | "holistic_comprehensive" => {
                self.tools.has_tool("knowledge_query").then(|| {
                    Plan::with_actions(
                        format!("'{}' strategy consults the knowledge base", chosen.path_type),
                        vec![Action::new("knowledge_query", json!({ "query": query }))],
                        0.6,
                    )
                })
            }
            _ => None,
        };

        planned.unwrap_or_else(|| {
            // Strategy-derived direct answer; internal seed text stays internal
            Plan::direct(
                format!("Answering directly under the '{}' strategy", chosen.path_type),
                format!(
                    "我分析了您的问题「{}」。{}。如果您需要更具体的信息，欢迎告诉我细节，我会进一步展开。",
                    clip(query, 80),
                    chosen.description
                ),
                0.5,
            )
        })
    }
}

fn matches_any(lowered: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| lowered.contains(p))
}

/// Build the input object for a known tool.
fn tool_input(tool: &str, query: &str, chosen: &ReasoningPath) -> Value {
    match tool {
        "web_search" => json!({ "query": refine_search_query(query, chosen) }),
        "idea_verification" => json!({
            "idea_text": format!("Idea for '{query}': {}", chosen.description)
        }),
        "knowledge_query" => json!({ "query": query }),
        _ => json!({ "query": query }),
    }
}

fn image_action(query: &str, visual: &VisualDecision) -> Action {
    Action::new(
        IMAGE_TOOL,
        json!({
            "prompt": query,
            "visual_type": visual.visual_type,
            "style": visual.style_hint,
            "timing": visual.timing,
        }),
    )
}

/// Sharpen the search query using hints from the chosen path description.
fn refine_search_query(query: &str, chosen: &ReasoningPath) -> String {
    if WANTS_DETAIL.is_match(&chosen.description) {
        format!("{query} 详细信息")
    } else if WANTS_LATEST.is_match(&chosen.description) {
        format!("{query} latest developments")
    } else {
        query.to_string()
    }
}

fn apology_answer(query: &str) -> String {
    format!(
        "抱歉，我在处理您的请求「{}」时遇到了内部问题。请换一种说法再试一次。",
        clip(query, 60)
    )
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
