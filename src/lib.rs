//! # noesis-core
//!
//! A meta-cognitive decision engine: given a query, it selects a reasoning
//! strategy with a multi-armed bandit, verifies candidate strategies before
//! committing, translates the winner into an executable plan, and learns
//! from outcomes so future decisions improve.
//!
//! ## Core Components
//!
//! - **LLM Multiplexer**: uniform chat-completion surface over N providers
//!   with routing, health tracking, fallback, and caching
//! - **Prior Reasoner**: fast query triage and thinking-seed generation
//! - **Path Generator**: candidate `ReasoningPath` sets from a fixed
//!   strategy vocabulary
//! - **MAB Selector**: Thompson/UCB/ε-greedy selection with golden-template
//!   fast path and trial-ground lifecycle
//! - **Decision Pipeline**: the five-stage verify-then-learn loop
//! - **Strategy Interpreter**: chosen strategy to direct answer or tool plan
//!
//! ## Example
//!
//! ```rust,ignore
//! use noesis_core::{CognitiveCore, CoreConfig, ToolRegistry};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let core = CognitiveCore::with_clients(
//!     CoreConfig::default(),
//!     vec![/* provider clients */],
//!     Arc::new(ToolRegistry::new()),
//! );
//! let plan = core.decide_and_plan_blocking("你好", &HashMap::new());
//! assert!(plan.is_direct_answer());
//! ```

pub mod config;
pub mod error;
pub mod golden;
pub mod interpreter;
pub mod llm;
pub mod mab;
pub mod paths;
pub mod pipeline;
pub mod reasoner;
pub mod state;
pub mod tools;
pub mod trial;
pub mod verifier;

// Re-exports for convenience
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use golden::{GoldenConfig, GoldenRegistry, GoldenTemplate, TemplateMatchRecord};
pub use interpreter::{
    decide_visual, Action, Plan, RiskLevel, StrategyInterpreter, VisualDecision,
    VisualOpportunity,
};
pub use llm::{
    AnthropicClient, CacheConfig, ChatMessage, ChatRequest, ChatRole, ClientConfig, CostTracker,
    LlmClient, LlmErrorType, LlmMultiplexer, LlmResponse, MultiplexerConfig, MultiplexerStats,
    OpenAiCompatClient, Provider, ProviderStatus, ScriptedClient, TokenUsage,
};
pub use mab::{
    DecisionArm, FeedbackSource, MabConfig, MabSelector, Selection, SelectionAlgorithm,
    SelectionMethod, SourceStats,
};
pub use paths::{
    normalize_path_type, LearningSource, PathGenerator, PathProvenance, ReasoningPath,
    ValidationStatus, CREATIVE_DETOUR, STRATEGY_VOCABULARY,
};
pub use pipeline::{
    CognitiveCore, CoreStats, DecisionResult, StageTimings, VerificationStats, VerifiedPath,
};
pub use reasoner::{compose_seed, PriorReasoner, RouteStrategy, Triage};
pub use state::{CoreSnapshot, SCHEMA_VERSION};
pub use tools::{Tool, ToolRegistry, ToolResult};
pub use trial::{CullRecord, CullingReport, TrialAnalytics, TrialConfig, TrialGround};
pub use verifier::{
    FixedVerifier, IdeaVerifier, ToolVerifier, VerificationOutcome, VerifierConfig,
};
