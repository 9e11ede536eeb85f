//! Reasoning path model: strategy families, instances, and provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The fixed strategy-family vocabulary the generator draws from.
///
/// `strategy_id` values are the normalized forms of these names; the MAB
/// learns at this granularity.
pub const STRATEGY_VOCABULARY: [&str; 6] = [
    "systematic_analytical",
    "exploratory_investigative",
    "critical_questioning",
    "practical_pragmatic",
    "creative_innovative",
    "holistic_comprehensive",
];

/// Strategy id of the synthesized detour path used when nothing is feasible.
pub const CREATIVE_DETOUR: &str = "creative_detour";

/// Normalize a path type into its stable strategy id.
///
/// Lowercases, maps every non-alphanumeric run to a single underscore, and
/// trims edge underscores, so any two spellings of the same family collapse
/// to one learning key.
pub fn normalize_path_type(path_type: &str) -> String {
    let mut out = String::with_capacity(path_type.len());
    let mut last_was_sep = true;
    for ch in path_type.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Where a strategy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningSource {
    StaticTemplate,
    LearnedExploration,
    ManualAddition,
    Evolved,
}

/// Verification lifecycle state of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Unverified,
    Pending,
    Verified,
    Conflicting,
}

/// A reference to where a piece of strategy knowledge came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub title: String,
    pub url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// One validation event against a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub verdict: ValidationStatus,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only update note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

/// Knowledge provenance for a path.
///
/// Relationships are an adjacency map keyed by `strategy_id` strings, so the
/// graph serializes without cycles or pointer chasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathProvenance {
    pub sources: Vec<SourceRecord>,
    pub validations: Vec<ValidationRecord>,
    pub updates: Vec<UpdateRecord>,
    /// strategy_id -> related strategy_ids, labeled by the edge kind
    pub related: HashMap<String, Vec<String>>,
}

impl PathProvenance {
    pub fn add_source(&mut self, title: impl Into<String>, url: Option<String>) {
        self.sources.push(SourceRecord {
            title: title.into(),
            url,
            recorded_at: Utc::now(),
        });
    }

    pub fn add_validation(&mut self, verdict: ValidationStatus, note: impl Into<String>) {
        self.validations.push(ValidationRecord {
            verdict,
            note: note.into(),
            recorded_at: Utc::now(),
        });
    }

    pub fn relate(&mut self, from_strategy: &str, to_strategy: &str) {
        self.related
            .entry(from_strategy.to_string())
            .or_default()
            .push(to_strategy.to_string());
    }
}

/// A candidate strategy instance for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    /// Stable family id the bandit learns on
    pub strategy_id: String,
    /// Unique per-generation id used for tracing only
    pub instance_id: String,
    /// Human label, e.g. "systematic_analytical"
    pub path_type: String,
    pub description: String,
    pub prompt_template: String,
    pub learning_source: LearningSource,
    /// Confidence in [0, 1]
    pub confidence_score: f64,
    pub validation_status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<PathProvenance>,
}

impl ReasoningPath {
    /// Build a new instance of a strategy family.
    ///
    /// `strategy_id` is derived deterministically from `path_type`;
    /// `instance_id` is unique per call.
    pub fn new(
        path_type: impl Into<String>,
        description: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        let path_type = path_type.into();
        let strategy_id = normalize_path_type(&path_type);
        let instance_id = Self::fresh_instance_id(&strategy_id);
        Self {
            strategy_id,
            instance_id,
            path_type,
            description: description.into(),
            prompt_template: prompt_template.into(),
            learning_source: LearningSource::StaticTemplate,
            confidence_score: 1.0,
            validation_status: ValidationStatus::Unverified,
            provenance: None,
        }
    }

    fn fresh_instance_id(strategy_id: &str) -> String {
        let short = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}",
            strategy_id,
            Utc::now().timestamp_millis(),
            &short[..8]
        )
    }

    pub fn with_source(mut self, source: LearningSource) -> Self {
        self.learning_source = source;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_provenance(mut self, provenance: PathProvenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// The synthesized fallback path used when every candidate is infeasible.
    pub fn creative_detour(query: &str) -> Self {
        let mut path = Self::new(
            CREATIVE_DETOUR,
            format!("Lateral approach to '{query}' that sidesteps the blocked framings"),
            "Take an unconventional angle and look for an answer outside the obvious solution space",
        );
        path.learning_source = LearningSource::Evolved;
        path.confidence_score = 0.5;
        path
    }
}
