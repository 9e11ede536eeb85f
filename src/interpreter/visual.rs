//! Visual-intelligence decision.
//!
//! When an image-generation tool is registered, the interpreter does not
//! blindly attach it to plans; it weighs the opportunity against the risk of
//! generating an unwanted image. This is the one tool-selection spot that
//! needs nontrivial local reasoning.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

/// Why an image might help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualOpportunity {
    ExplicitRequest,
    Educational,
    Creative,
    EmotionalResonance,
    None,
}

/// Overall risk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of the visual-intelligence decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualDecision {
    pub should_generate: bool,
    pub confidence: f64,
    pub reason: String,
    pub opportunity: VisualOpportunity,
    pub opportunity_score: f64,
    pub threshold: f64,
    pub risk_level: RiskLevel,
    /// Suggested visual type, e.g. "illustration"
    pub visual_type: String,
    pub style_hint: String,
    /// "immediate" or "deferred"
    pub timing: String,
}

static EXPLICIT_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(draw|paint|generate (an? )?(image|picture|logo)|make (an? )?(image|picture)|画|生成图|生成一张|画一)")
        .expect("invalid regex")
});

static EDUCATIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(diagram|illustrate|visuali[sz]e|show me how|explain .* with|图解|示意图)")
        .expect("invalid regex")
});

static CREATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(design|imagine|concept art|poster|mascot|设计|创意|海报)")
        .expect("invalid regex")
});

static EMOTIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(celebrate|birthday|congratulat|anniversary|庆祝|生日|纪念)")
        .expect("invalid regex")
});

/// Evaluate whether attaching image generation to the plan is wise.
pub fn decide_visual(query: &str, ctx: &HashMap<String, Value>) -> VisualDecision {
    let (opportunity, strength, visual_type, style_hint) = assess_opportunity(query);
    let (risk_score, risk_factors) = assess_risk(strength, ctx);

    let risk_level = if risk_score >= 0.7 {
        RiskLevel::High
    } else if risk_score >= 0.4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    // Risk can at most halve the opportunity
    let mut score = strength * (1.0 - risk_score * 0.5);
    if opportunity == VisualOpportunity::ExplicitRequest {
        score *= 1.2;
    }
    let score = score.clamp(0.0, 1.0);

    let threshold = decision_threshold(opportunity, ctx);

    let mut should_generate = score >= threshold;
    let reason;
    if risk_level == RiskLevel::High {
        should_generate = false;
        reason = format!("risk too high ({})", risk_factors.join(", "));
    } else if opportunity == VisualOpportunity::None {
        should_generate = false;
        reason = "no visual opportunity detected".to_string();
    } else if should_generate {
        reason = format!("opportunity score {score:.2} clears threshold {threshold:.2}");
    } else {
        reason = format!("opportunity score {score:.2} below threshold {threshold:.2}");
    }

    let mut confidence = score;
    match risk_level {
        RiskLevel::Low => confidence *= 1.05,
        RiskLevel::Medium => {}
        RiskLevel::High => confidence *= 0.7,
    }

    let timing = if ctx
        .get("interaction_phase")
        .and_then(Value::as_str)
        .map(|p| p == "problem_solving")
        .unwrap_or(false)
    {
        "deferred"
    } else {
        "immediate"
    };

    debug!(
        ?opportunity,
        score,
        threshold,
        should_generate,
        "visual intelligence decision"
    );

    VisualDecision {
        should_generate,
        confidence: confidence.clamp(0.1, 0.95),
        reason,
        opportunity,
        opportunity_score: score,
        threshold,
        risk_level,
        visual_type,
        style_hint,
        timing: timing.to_string(),
    }
}

fn assess_opportunity(query: &str) -> (VisualOpportunity, f64, String, String) {
    if EXPLICIT_REQUEST.is_match(query) {
        return (
            VisualOpportunity::ExplicitRequest,
            0.9,
            "illustration".to_string(),
            "as requested".to_string(),
        );
    }
    if EDUCATIONAL.is_match(query) {
        return (
            VisualOpportunity::Educational,
            0.6,
            "diagram".to_string(),
            "clean and schematic".to_string(),
        );
    }
    if CREATIVE.is_match(query) {
        return (
            VisualOpportunity::Creative,
            0.55,
            "concept_art".to_string(),
            "expressive".to_string(),
        );
    }
    if EMOTIONAL.is_match(query) {
        return (
            VisualOpportunity::EmotionalResonance,
            0.5,
            "celebration_card".to_string(),
            "warm".to_string(),
        );
    }
    (VisualOpportunity::None, 0.0, String::new(), String::new())
}

fn assess_risk(strength: f64, ctx: &HashMap<String, Value>) -> (f64, Vec<String>) {
    let mut score: f64 = 0.0;
    let mut factors = Vec::new();

    if strength < 0.3 {
        score += 0.35;
        factors.push("weak visual opportunity".to_string());
    }
    if let Some(state) = ctx.get("user_emotional_state").and_then(Value::as_str) {
        if matches!(state, "frustrated" | "angry" | "overwhelmed") {
            score += 0.4;
            factors.push(format!("user emotional state: {state}"));
        }
    }
    if ctx
        .get("content_complexity")
        .and_then(Value::as_str)
        .map(|c| c == "very_high")
        .unwrap_or(false)
    {
        score += 0.15;
        factors.push("content complexity very high".to_string());
    }
    if ctx
        .get("generation_timing")
        .and_then(Value::as_str)
        .map(|t| t == "not_recommended")
        .unwrap_or(false)
    {
        score += 0.3;
        factors.push("timing not recommended".to_string());
    }

    (score.min(1.0), factors)
}

fn decision_threshold(opportunity: VisualOpportunity, ctx: &HashMap<String, Value>) -> f64 {
    if opportunity == VisualOpportunity::ExplicitRequest {
        return 0.3;
    }
    let mut threshold: f64 = 0.6;
    match ctx.get("interaction_phase").and_then(Value::as_str) {
        Some("creative_brainstorming") => threshold -= 0.1,
        Some("problem_solving") => threshold += 0.1,
        _ => {}
    }
    match ctx.get("user_emotional_state").and_then(Value::as_str) {
        Some("excited" | "inspired" | "curious") => threshold -= 0.05,
        Some("frustrated" | "overwhelmed") => threshold += 0.15,
        _ => {}
    }
    threshold.clamp(0.2, 0.9)
}
