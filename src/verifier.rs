//! Idea verifier contract.
//!
//! The verifier scores a text proposition for feasibility and produces a
//! reward signal the bandit can learn from. It is consumed as an external
//! contract: failures never propagate into the pipeline, they collapse to a
//! neutral fallback outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::tools::ToolRegistry;

/// Verifier tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Feasibility scores above this count as feasible
    pub feasibility_cutoff: f64,
    /// Per-verification timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            feasibility_cutoff: 0.3,
            timeout_secs: 60,
        }
    }
}

/// Outcome of verifying one proposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Feasibility in [0, 1]
    pub feasibility_score: f64,
    /// Reward signal in [-1, 1]
    pub reward_score: f64,
    /// True when this outcome is a stand-in for a failed verification
    pub fallback: bool,
    pub details: Option<Value>,
}

impl VerificationOutcome {
    pub fn new(feasibility_score: f64, reward_score: f64) -> Self {
        Self {
            feasibility_score: feasibility_score.clamp(0.0, 1.0),
            reward_score: reward_score.clamp(-1.0, 1.0),
            fallback: false,
            details: None,
        }
    }

    /// Neutral stand-in used whenever verification cannot run.
    pub fn neutral_fallback() -> Self {
        Self {
            feasibility_score: 0.5,
            reward_score: 0.0,
            fallback: true,
            details: None,
        }
    }

    pub fn is_feasible(&self, cutoff: f64) -> bool {
        self.feasibility_score > cutoff && !self.fallback
    }
}

/// Feasibility verifier contract.
#[async_trait]
pub trait IdeaVerifier: Send + Sync {
    /// Score `text` for feasibility. Must never panic or error into the
    /// pipeline; implementations return `neutral_fallback()` on failure.
    async fn verify(&self, text: &str, context: &HashMap<String, Value>) -> VerificationOutcome;
}

/// Verifier backed by the `idea_verification` tool.
pub struct ToolVerifier {
    registry: Arc<ToolRegistry>,
    config: VerifierConfig,
}

impl ToolVerifier {
    pub const TOOL_NAME: &'static str = "idea_verification";

    pub fn new(registry: Arc<ToolRegistry>, config: VerifierConfig) -> Self {
        Self { registry, config }
    }

    fn parse_outcome(data: &Value) -> Option<VerificationOutcome> {
        // Accept both flat and nested feasibility shapes
        let feasibility = data
            .get("feasibility_score")
            .or_else(|| data.get("feasibility_analysis")?.get("feasibility_score"))
            .and_then(Value::as_f64)?;
        let reward = data
            .get("reward_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let mut outcome = VerificationOutcome::new(feasibility, reward);
        outcome.details = Some(data.clone());
        Some(outcome)
    }
}

#[async_trait]
impl IdeaVerifier for ToolVerifier {
    async fn verify(&self, text: &str, context: &HashMap<String, Value>) -> VerificationOutcome {
        if !self.registry.has_tool(Self::TOOL_NAME) {
            return VerificationOutcome::neutral_fallback();
        }

        let mut input = json!({ "idea_text": text });
        if let Some(stage) = context.get("stage") {
            input["stage"] = stage.clone();
        }

        let call = self.registry.execute(Self::TOOL_NAME, input);
        let result = match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            call,
        )
        .await
        {
            Ok(r) => r,
            Err(_) => {
                warn!("idea verification timed out");
                return VerificationOutcome::neutral_fallback();
            }
        };

        if !result.success {
            warn!(error = ?result.error, "idea verification tool failed");
            return VerificationOutcome::neutral_fallback();
        }

        Self::parse_outcome(&result.data).unwrap_or_else(VerificationOutcome::neutral_fallback)
    }
}

/// Verifier that scores every proposition the same way. Offline default.
pub struct FixedVerifier {
    outcome: VerificationOutcome,
}

impl FixedVerifier {
    pub fn new(feasibility_score: f64, reward_score: f64) -> Self {
        Self {
            outcome: VerificationOutcome::new(feasibility_score, reward_score),
        }
    }
}

#[async_trait]
impl IdeaVerifier for FixedVerifier {
    async fn verify(&self, _text: &str, _context: &HashMap<String, Value>) -> VerificationOutcome {
        self.outcome.clone()
    }
}
