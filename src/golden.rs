//! Golden template registry.
//!
//! Strategies that prove consistently excellent are promoted to templates
//! that bypass bandit selection entirely. Golden templates are protected
//! from culling and only leave the registry through quality-based eviction
//! or explicit revocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::mab::arm::DecisionArm;
use crate::paths::ReasoningPath;

const MATCH_THRESHOLD: f64 = 0.85;
const MATCH_HISTORY_CAP: usize = 100;
const MATCH_HISTORY_TRIM: usize = 50;
const EVENT_HISTORY_CAP: usize = 100;
const EVENT_HISTORY_TRIM: usize = 50;

/// Golden registry tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenConfig {
    /// Overall success rate required for promotion
    pub success_rate_threshold: f64,
    /// Selections required before promotion is considered
    pub min_samples_required: u64,
    /// Recent-results window checked for stability
    pub stability_window: usize,
    /// Registry capacity; worst template evicted on overflow
    pub max_templates: usize,
}

impl Default for GoldenConfig {
    fn default() -> Self {
        Self {
            success_rate_threshold: 0.90,
            min_samples_required: 20,
            stability_window: 10,
            max_templates: 50,
        }
    }
}

/// Snapshot of a promoted strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTemplate {
    pub strategy_id: String,
    pub path_type: String,
    pub description: String,
    pub success_rate: f64,
    pub activation_count: u64,
    pub average_reward: f64,
    pub stability_score: f64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub usage_as_template: u64,
    pub promotion_reason: String,
}

/// One fast-path match event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMatchRecord {
    pub strategy_id: String,
    pub instance_id: String,
    pub match_score: f64,
    pub matched_at: DateTime<Utc>,
}

/// Promotion or revocation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenEvent {
    pub strategy_id: String,
    pub action: String,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of matching candidates against the registry.
#[derive(Debug, Clone)]
pub struct TemplateMatch {
    /// Index into the candidate slice
    pub path_index: usize,
    pub strategy_id: String,
    pub match_score: f64,
}

/// Registry of promoted strategy snapshots, keyed by `strategy_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoldenRegistry {
    pub config: GoldenConfig,
    templates: HashMap<String, GoldenTemplate>,
    match_history: Vec<TemplateMatchRecord>,
    event_history: Vec<GoldenEvent>,
}

impl GoldenRegistry {
    pub fn new(config: GoldenConfig) -> Self {
        Self {
            config,
            templates: HashMap::new(),
            match_history: Vec::new(),
            event_history: Vec::new(),
        }
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.templates.contains_key(strategy_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, strategy_id: &str) -> Option<&GoldenTemplate> {
        self.templates.get(strategy_id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &GoldenTemplate> {
        self.templates.values()
    }

    /// Check promotion criteria after a feedback event, promoting or
    /// refreshing the snapshot as appropriate.
    pub fn check_and_promote(&mut self, arm: &DecisionArm) -> bool {
        if self.templates.contains_key(&arm.strategy_id) {
            self.refresh_snapshot(arm);
            return false;
        }

        if arm.success_rate() < self.config.success_rate_threshold
            || arm.activation_count < self.config.min_samples_required
        {
            return false;
        }
        if !self.is_stable(arm) {
            return false;
        }

        self.promote(arm, "high_performance");
        true
    }

    /// Recent window must hold at least 95% of the overall success rate.
    fn is_stable(&self, arm: &DecisionArm) -> bool {
        match arm.recent_window_success_rate(self.config.stability_window) {
            Some(recent) => recent >= arm.success_rate() * 0.95,
            None => false,
        }
    }

    fn promote(&mut self, arm: &DecisionArm, reason: &str) {
        if self.templates.len() >= self.config.max_templates {
            self.evict_worst();
        }
        let now = Utc::now();
        info!(
            strategy_id = %arm.strategy_id,
            success_rate = arm.success_rate(),
            activations = arm.activation_count,
            "promoting strategy to golden template"
        );
        self.templates.insert(
            arm.strategy_id.clone(),
            GoldenTemplate {
                strategy_id: arm.strategy_id.clone(),
                path_type: arm.path_type.clone(),
                description: String::new(),
                success_rate: arm.success_rate(),
                activation_count: arm.activation_count,
                average_reward: arm.average_reward(),
                stability_score: arm.stability_score(),
                created_at: now,
                last_updated: now,
                usage_as_template: 0,
                promotion_reason: reason.to_string(),
            },
        );
        self.record_event(&arm.strategy_id, "promoted", reason);
    }

    fn refresh_snapshot(&mut self, arm: &DecisionArm) {
        let stability = arm.stability_score();
        if let Some(template) = self.templates.get_mut(&arm.strategy_id) {
            template.success_rate = arm.success_rate();
            template.activation_count = arm.activation_count;
            template.average_reward = arm.average_reward();
            template.stability_score = stability;
            template.last_updated = Utc::now();
        }
    }

    /// Promote unconditionally (operator override).
    pub fn force_promote(&mut self, arm: &DecisionArm, reason: &str) {
        if self.templates.contains_key(&arm.strategy_id) {
            self.refresh_snapshot(arm);
        } else {
            self.promote(arm, reason);
        }
    }

    /// Remove a template, recording the revocation.
    pub fn revoke(&mut self, strategy_id: &str, reason: &str) -> bool {
        let removed = self.templates.remove(strategy_id).is_some();
        if removed {
            self.record_event(strategy_id, "revoked", reason);
        }
        removed
    }

    fn record_event(&mut self, strategy_id: &str, action: &str, reason: &str) {
        self.event_history.push(GoldenEvent {
            strategy_id: strategy_id.to_string(),
            action: action.to_string(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        });
        if self.event_history.len() > EVENT_HISTORY_CAP {
            self.event_history = self
                .event_history
                .split_off(self.event_history.len() - EVENT_HISTORY_TRIM);
        }
    }

    fn evict_worst(&mut self) {
        let Some(worst_id) = self
            .templates
            .values()
            .min_by(|a, b| {
                quality_score(a)
                    .partial_cmp(&quality_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|t| t.strategy_id.clone())
        else {
            return;
        };
        info!(strategy_id = %worst_id, "evicting lowest-quality golden template");
        self.templates.remove(&worst_id);
        self.record_event(&worst_id, "evicted", "capacity");
    }

    /// Find the best template match among the candidates, if any clears the
    /// fast-path threshold.
    pub fn best_match(&self, paths: &[ReasoningPath]) -> Option<TemplateMatch> {
        if self.templates.is_empty() {
            return None;
        }

        let mut best: Option<TemplateMatch> = None;
        for template in self.templates.values() {
            for (index, path) in paths.iter().enumerate() {
                let score = match_score(template, path);
                if score <= MATCH_THRESHOLD {
                    continue;
                }
                let better = best
                    .as_ref()
                    .map(|b| {
                        score > b.match_score
                            // Deterministic tie-break for test stability
                            || (score == b.match_score && template.strategy_id < b.strategy_id)
                    })
                    .unwrap_or(true);
                if better {
                    best = Some(TemplateMatch {
                        path_index: index,
                        strategy_id: template.strategy_id.clone(),
                        match_score: score,
                    });
                }
            }
        }
        if let Some(found) = &best {
            debug!(
                strategy_id = %found.strategy_id,
                score = found.match_score,
                "golden template fast-path match"
            );
        }
        best
    }

    /// Record that a template served as the fast path.
    pub fn record_template_use(&mut self, matched: &TemplateMatch, path: &ReasoningPath) {
        if let Some(template) = self.templates.get_mut(&matched.strategy_id) {
            template.usage_as_template += 1;
        }
        self.match_history.push(TemplateMatchRecord {
            strategy_id: matched.strategy_id.clone(),
            instance_id: path.instance_id.clone(),
            match_score: matched.match_score,
            matched_at: Utc::now(),
        });
        if self.match_history.len() > MATCH_HISTORY_CAP {
            self.match_history = self
                .match_history
                .split_off(self.match_history.len() - MATCH_HISTORY_TRIM);
        }
    }

    pub fn match_history(&self) -> &[TemplateMatchRecord] {
        &self.match_history
    }

    pub fn event_history(&self) -> &[GoldenEvent] {
        &self.event_history
    }

    /// Insert a pre-built template (persistence restore, tests).
    pub fn insert_template(&mut self, template: GoldenTemplate) {
        if self.templates.len() >= self.config.max_templates
            && !self.templates.contains_key(&template.strategy_id)
        {
            self.evict_worst();
        }
        self.templates.insert(template.strategy_id.clone(), template);
    }
}

/// Composite quality used for eviction ordering.
pub fn quality_score(template: &GoldenTemplate) -> f64 {
    0.4 * template.success_rate
        + 0.3 * (template.usage_as_template as f64 / 10.0).min(1.0)
        + 0.2 * template.stability_score
        + 0.1 * recency_score(template)
}

/// 1.0 within 24h of last update, linear decay to 0.0 at 7 days.
fn recency_score(template: &GoldenTemplate) -> f64 {
    let hours = (Utc::now() - template.last_updated).num_minutes() as f64 / 60.0;
    if hours <= 24.0 {
        1.0
    } else if hours >= 168.0 {
        0.0
    } else {
        1.0 - (hours - 24.0) / 144.0
    }
}

/// Match strength between a template and a candidate path.
///
/// Prefers `strategy_id` equality over `path_type` equality, adds scaled
/// description similarity and a performance bonus. An exact strategy match
/// carries an extra 0.1 on top of its base weight.
fn match_score(template: &GoldenTemplate, path: &ReasoningPath) -> f64 {
    let mut score = 0.0;
    if template.strategy_id == path.strategy_id {
        score += 0.6 + 0.1;
    } else if template.path_type == path.path_type {
        score += 0.4;
    } else {
        return 0.0;
    }
    score += jaccard_similarity(&template.description, &path.description) * 0.2;
    score += (template.success_rate - 0.8).clamp(0.0, 0.2);
    score.min(1.0)
}

/// Word-set Jaccard similarity of two descriptions.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::LearningSource;

    fn excellent_arm(strategy_id: &str) -> DecisionArm {
        let mut arm = DecisionArm::new(strategy_id, strategy_id);
        for _ in 0..30 {
            arm.record_selection();
            arm.update_performance(true, 0.8);
        }
        arm
    }

    fn golden_template(strategy_id: &str, success_rate: f64) -> GoldenTemplate {
        let now = Utc::now();
        GoldenTemplate {
            strategy_id: strategy_id.to_string(),
            path_type: strategy_id.to_string(),
            description: String::new(),
            success_rate,
            activation_count: 30,
            average_reward: 0.5,
            stability_score: 0.9,
            created_at: now,
            last_updated: now,
            usage_as_template: 0,
            promotion_reason: "test".to_string(),
        }
    }

    #[test]
    fn test_promotion_requires_all_criteria() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());

        // Not enough samples
        let mut young = DecisionArm::new("young", "young");
        for _ in 0..5 {
            young.record_selection();
            young.update_performance(true, 0.5);
        }
        assert!(!registry.check_and_promote(&young));

        // Enough samples, poor rate
        let mut weak = DecisionArm::new("weak", "weak");
        for i in 0..30 {
            weak.record_selection();
            weak.update_performance(i % 2 == 0, 0.0);
        }
        assert!(!registry.check_and_promote(&weak));

        // All criteria met
        let strong = excellent_arm("strong");
        assert!(registry.check_and_promote(&strong));
        assert!(registry.contains("strong"));
    }

    #[test]
    fn test_no_duplicate_promotion_updates_snapshot() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        let mut arm = excellent_arm("s");
        assert!(registry.check_and_promote(&arm));

        arm.record_selection();
        arm.update_performance(true, 0.9);
        assert!(!registry.check_and_promote(&arm));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("s").unwrap().activation_count,
            arm.activation_count
        );
    }

    #[test]
    fn test_capacity_eviction_removes_worst() {
        let mut registry = GoldenRegistry::new(GoldenConfig {
            max_templates: 2,
            ..GoldenConfig::default()
        });
        registry.insert_template(golden_template("good", 0.95));
        registry.insert_template(golden_template("mediocre", 0.91));
        registry.insert_template(golden_template("best", 0.99));

        assert_eq!(registry.len(), 2);
        assert!(!registry.contains("mediocre"));
        assert!(registry.contains("best"));
    }

    #[test]
    fn test_fast_path_match_on_strategy_id() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        registry.insert_template(golden_template("systematic_analytical", 0.97));

        let paths = vec![
            ReasoningPath::new("creative_innovative", "improvise", "t"),
            ReasoningPath::new("systematic_analytical", "structured", "t"),
        ];
        let matched = registry.best_match(&paths).expect("should match");
        assert_eq!(matched.path_index, 1);
        assert_eq!(matched.strategy_id, "systematic_analytical");
        // 0.7 exact id match + 0.17 performance bonus
        assert!(matched.match_score > MATCH_THRESHOLD);
    }

    #[test]
    fn test_weak_template_does_not_clear_threshold() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        // 0.7 + min(0.2, 0.905-0.8) = 0.805 < 0.85 without description overlap
        registry.insert_template(golden_template("systematic_analytical", 0.905));

        let paths = vec![ReasoningPath::new("systematic_analytical", "structured", "t")];
        assert!(registry.best_match(&paths).is_none());
    }

    #[test]
    fn test_template_use_recorded() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        registry.insert_template(golden_template("systematic_analytical", 0.99));

        let paths = vec![ReasoningPath::new("systematic_analytical", "d", "t")];
        let matched = registry.best_match(&paths).unwrap();
        registry.record_template_use(&matched, &paths[0]);

        assert_eq!(
            registry.get("systematic_analytical").unwrap().usage_as_template,
            1
        );
        assert_eq!(registry.match_history().len(), 1);
    }

    #[test]
    fn test_force_promote_and_revoke() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        let mut arm = DecisionArm::new("meh", "meh");
        arm.source = LearningSource::ManualAddition;
        arm.record_selection();
        arm.update_performance(false, -0.5);

        registry.force_promote(&arm, "operator_override");
        assert!(registry.contains("meh"));

        assert!(registry.revoke("meh", "changed_mind"));
        assert!(!registry.contains("meh"));
        let actions: Vec<&str> = registry
            .event_history()
            .iter()
            .map(|e| e.action.as_str())
            .collect();
        assert_eq!(actions, vec!["promoted", "revoked"]);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert!((jaccard_similarity("a b c", "b c d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", "a"), 0.0);
    }

    #[test]
    fn test_unstable_arm_not_promoted() {
        let mut registry = GoldenRegistry::new(GoldenConfig::default());
        let mut arm = DecisionArm::new("flaky", "flaky");
        // 95% overall but the last 10 are half failures
        for _ in 0..40 {
            arm.record_selection();
            arm.update_performance(true, 0.5);
        }
        for i in 0..10 {
            arm.record_selection();
            arm.update_performance(i % 2 == 0, 0.0);
        }
        assert!(arm.success_rate() >= 0.9);
        assert!(!registry.check_and_promote(&arm));
    }
}
