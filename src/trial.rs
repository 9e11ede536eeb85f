//! Trial ground: lifecycle management for learned and manually added
//! strategies.
//!
//! New strategies enter with an exploration boost that decays over their
//! first selections. Underperformers are flagged as culling candidates and
//! removed once the protection rules allow it; golden templates are never
//! culled.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::golden::GoldenRegistry;
use crate::mab::arm::DecisionArm;
use crate::paths::LearningSource;

const TRIAL_HISTORY_CAP: usize = 200;
const TRIAL_HISTORY_TRIM: usize = 100;

/// Trial ground tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Selections a new strategy spends with a decaying boost
    pub exploration_boost_rounds: u32,
    /// Peak boost bonus at entry
    pub learned_path_bonus: f64,
    /// Success rate below which a strategy becomes a culling candidate
    pub culling_threshold: f64,
    /// Activations required before culling is considered
    pub culling_min_samples: u64,
    /// Failures-in-a-row that force culling
    pub consecutive_failures_limit: u32,
    /// Seconds a learned strategy is protected from culling after entry
    pub learned_path_protection_secs: i64,
    /// Seconds on the watch list before sustained weakness culls
    pub watch_duration_secs: i64,
    /// Bound on the culled-paths history
    pub max_culled_history: usize,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            exploration_boost_rounds: 10,
            learned_path_bonus: 0.15,
            culling_threshold: 0.25,
            culling_min_samples: 20,
            consecutive_failures_limit: 10,
            learned_path_protection_secs: 3600,
            watch_duration_secs: 1800,
            max_culled_history: 100,
        }
    }
}

/// Registration metadata for a non-static strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPathMeta {
    pub strategy_id: String,
    pub path_type: String,
    pub source: LearningSource,
    pub trial_start: DateTime<Utc>,
}

/// Watch-list entry for a potential culling candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub reason: String,
    pub added_at: DateTime<Utc>,
    pub success_rate_at_entry: f64,
    pub sample_count_at_entry: u64,
    pub consecutive_failures: u32,
}

/// Record of one culled strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CullRecord {
    pub strategy_id: String,
    pub reason: String,
    pub final_success_rate: f64,
    pub final_activation_count: u64,
    pub was_learned: bool,
    pub culled_at: DateTime<Utc>,
}

/// Trial entry event, kept as a bounded audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialEntry {
    pub strategy_id: String,
    pub source: LearningSource,
    pub entered_at: DateTime<Utc>,
}

/// Report from one culling pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CullingReport {
    pub candidates_reviewed: usize,
    pub culled: Vec<CullRecord>,
    pub spared: Vec<String>,
}

/// Analytics snapshot of the trial ground.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialAnalytics {
    pub learned_path_count: usize,
    pub boosted_path_count: usize,
    pub culling_candidate_count: usize,
    pub culled_total: usize,
    pub watch_list: Vec<String>,
}

/// Lifecycle state for learned/manual strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialGround {
    pub config: TrialConfig,
    learned_paths: HashMap<String, LearnedPathMeta>,
    exploration_boost_active: HashMap<String, u32>,
    culling_candidates: HashSet<String>,
    performance_watch_list: HashMap<String, WatchEntry>,
    culled_paths: Vec<CullRecord>,
    trial_history: Vec<TrialEntry>,
}

impl TrialGround {
    pub fn new(config: TrialConfig) -> Self {
        Self {
            config,
            learned_paths: HashMap::new(),
            exploration_boost_active: HashMap::new(),
            culling_candidates: HashSet::new(),
            performance_watch_list: HashMap::new(),
            culled_paths: Vec::new(),
            trial_history: Vec::new(),
        }
    }

    /// Register a newly created non-static strategy and start its boost.
    pub fn register(&mut self, strategy_id: &str, path_type: &str, source: LearningSource) {
        if self.learned_paths.contains_key(strategy_id) {
            return;
        }
        info!(strategy_id, ?source, "strategy entering trial ground");
        self.learned_paths.insert(
            strategy_id.to_string(),
            LearnedPathMeta {
                strategy_id: strategy_id.to_string(),
                path_type: path_type.to_string(),
                source,
                trial_start: Utc::now(),
            },
        );
        self.exploration_boost_active
            .insert(strategy_id.to_string(), self.config.exploration_boost_rounds);
        self.trial_history.push(TrialEntry {
            strategy_id: strategy_id.to_string(),
            source,
            entered_at: Utc::now(),
        });
        if self.trial_history.len() > TRIAL_HISTORY_CAP {
            self.trial_history = self
                .trial_history
                .split_off(self.trial_history.len() - TRIAL_HISTORY_TRIM);
        }
    }

    pub fn is_learned(&self, strategy_id: &str) -> bool {
        self.learned_paths
            .get(strategy_id)
            .map(|m| m.source == LearningSource::LearnedExploration)
            .unwrap_or(false)
    }

    /// Current exploration boost factor for a strategy.
    ///
    /// `1.0` means no boost. During the boost window the factor decays
    /// linearly with the remaining rounds; learned strategies keep a
    /// permanent extra 0.05 afterwards.
    pub fn exploration_boost(&self, strategy_id: &str) -> f64 {
        let mut boost = 1.0;
        if let Some(&remaining) = self.exploration_boost_active.get(strategy_id) {
            if remaining > 0 {
                let decay = remaining as f64 / self.config.exploration_boost_rounds as f64;
                boost += self.config.learned_path_bonus * decay;
            }
        }
        if self.is_learned(strategy_id) {
            boost += 0.05;
        }
        boost
    }

    /// Decrement the boost budget of a just-selected strategy, removing the
    /// entry when it reaches zero.
    pub fn note_selection(&mut self, strategy_id: &str) {
        if let Some(remaining) = self.exploration_boost_active.get_mut(strategy_id) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.exploration_boost_active.remove(strategy_id);
                info!(strategy_id, "exploration boost exhausted");
            }
        }
    }

    pub fn has_active_boosts(&self) -> bool {
        !self.exploration_boost_active.is_empty()
    }

    pub fn boost_remaining(&self, strategy_id: &str) -> Option<u32> {
        self.exploration_boost_active.get(strategy_id).copied()
    }

    /// Re-evaluate the candidate list after a feedback event.
    pub fn observe_feedback(&mut self, arm: &DecisionArm) {
        if arm.activation_count < self.config.culling_min_samples {
            return;
        }
        let strategy_id = &arm.strategy_id;
        let threshold = self.config.culling_threshold;

        if arm.success_rate() < threshold {
            if self.culling_candidates.insert(strategy_id.clone()) {
                warn!(
                    strategy_id = %strategy_id,
                    success_rate = arm.success_rate(),
                    "strategy flagged as culling candidate"
                );
                self.performance_watch_list.insert(
                    strategy_id.clone(),
                    WatchEntry {
                        reason: "low_success_rate".to_string(),
                        added_at: Utc::now(),
                        success_rate_at_entry: arm.success_rate(),
                        sample_count_at_entry: arm.activation_count,
                        consecutive_failures: arm.consecutive_failures(),
                    },
                );
            } else if let Some(entry) = self.performance_watch_list.get_mut(strategy_id) {
                entry.consecutive_failures = arm.consecutive_failures();
            }
        } else if self.culling_candidates.contains(strategy_id)
            && arm.success_rate() >= threshold * 1.2
        {
            info!(strategy_id = %strategy_id, "strategy recovered, leaving watch list");
            self.culling_candidates.remove(strategy_id);
            self.performance_watch_list.remove(strategy_id);
        }
    }

    /// Decide whether one candidate should be culled right now.
    fn should_cull(
        &self,
        arm: &DecisionArm,
        watch: Option<&WatchEntry>,
        golden: &GoldenRegistry,
    ) -> Option<String> {
        // Golden templates are protected absolutely
        if golden.contains(&arm.strategy_id) {
            return None;
        }

        let threshold = self.config.culling_threshold;

        if self.is_learned(&arm.strategy_id) {
            let meta = self.learned_paths.get(&arm.strategy_id)?;
            let in_protection = Utc::now() - meta.trial_start
                < Duration::seconds(self.config.learned_path_protection_secs);
            if in_protection {
                return None;
            }
            if arm.success_rate() <= threshold * 0.5 {
                return Some(format!(
                    "learned path expired protection with success rate {:.3}",
                    arm.success_rate()
                ));
            }
        }

        let consecutive = watch
            .map(|w| w.consecutive_failures)
            .unwrap_or_else(|| arm.consecutive_failures());
        if consecutive >= self.config.consecutive_failures_limit {
            return Some(format!("{consecutive} consecutive failures"));
        }

        if arm.success_rate() < threshold * 0.8 {
            if let Some(watch) = watch {
                let watched = Utc::now() - watch.added_at;
                if watched >= Duration::seconds(self.config.watch_duration_secs) {
                    return Some(format!(
                        "sustained weakness (success rate {:.3})",
                        arm.success_rate()
                    ));
                }
            }
        }

        if arm.activation_count > 50 && arm.success_rate() < threshold {
            return Some(format!(
                "still below threshold after {} activations",
                arm.activation_count
            ));
        }

        None
    }

    /// Run a culling pass over the candidate list, deleting arms that meet
    /// the criteria. Golden-protected candidates leave the list entirely.
    pub fn execute_culling(
        &mut self,
        arms: &mut HashMap<String, DecisionArm>,
        golden: &GoldenRegistry,
    ) -> CullingReport {
        let mut report = CullingReport {
            candidates_reviewed: self.culling_candidates.len(),
            ..CullingReport::default()
        };
        if self.culling_candidates.is_empty() {
            return report;
        }

        let candidates: Vec<String> = self.culling_candidates.iter().cloned().collect();
        let mut resolved: Vec<String> = Vec::new();

        for strategy_id in candidates {
            let Some(arm) = arms.get(&strategy_id) else {
                resolved.push(strategy_id);
                continue;
            };

            if golden.contains(&strategy_id) {
                // Protection wins; drop the candidacy so the list stays honest
                debug!(strategy_id = %strategy_id, "golden protection clears culling candidate");
                resolved.push(strategy_id.clone());
                report.spared.push(strategy_id);
                continue;
            }

            let watch = self.performance_watch_list.get(&strategy_id);
            match self.should_cull(arm, watch, golden) {
                Some(reason) => {
                    let record = CullRecord {
                        strategy_id: strategy_id.clone(),
                        reason: reason.clone(),
                        final_success_rate: arm.success_rate(),
                        final_activation_count: arm.activation_count,
                        was_learned: self.is_learned(&strategy_id),
                        culled_at: Utc::now(),
                    };
                    info!(strategy_id = %strategy_id, reason = %reason, "culling strategy");
                    arms.remove(&strategy_id);
                    self.learned_paths.remove(&strategy_id);
                    self.exploration_boost_active.remove(&strategy_id);
                    self.culled_paths.push(record.clone());
                    report.culled.push(record);
                    resolved.push(strategy_id);
                }
                None => {
                    report.spared.push(strategy_id);
                }
            }
        }

        for strategy_id in resolved {
            self.culling_candidates.remove(&strategy_id);
            self.performance_watch_list.remove(&strategy_id);
        }
        self.trim_culled_history();
        report
    }

    /// Cleanup cycle: drop spent boost entries and trim the culled history.
    pub fn run_maintenance(&mut self) {
        self.exploration_boost_active.retain(|_, remaining| *remaining > 0);
        self.trim_culled_history();
    }

    fn trim_culled_history(&mut self) {
        if self.culled_paths.len() > self.config.max_culled_history {
            let excess = self.culled_paths.len() - self.config.max_culled_history;
            self.culled_paths.drain(..excess);
        }
    }

    pub fn culling_candidates(&self) -> &HashSet<String> {
        &self.culling_candidates
    }

    pub fn culled_paths(&self) -> &[CullRecord] {
        &self.culled_paths
    }

    pub fn learned_paths(&self) -> &HashMap<String, LearnedPathMeta> {
        &self.learned_paths
    }

    pub fn analytics(&self) -> TrialAnalytics {
        TrialAnalytics {
            learned_path_count: self.learned_paths.len(),
            boosted_path_count: self.exploration_boost_active.len(),
            culling_candidate_count: self.culling_candidates.len(),
            culled_total: self.culled_paths.len(),
            watch_list: self.performance_watch_list.keys().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weak_arm(strategy_id: &str, samples: u64) -> DecisionArm {
        let mut arm = DecisionArm::new(strategy_id, strategy_id);
        for i in 0..samples {
            arm.record_selection();
            // ~10% success rate
            arm.update_performance(i % 10 == 0, -0.2);
        }
        arm
    }

    #[test]
    fn test_boost_decays_with_remaining_rounds() {
        let mut trial = TrialGround::new(TrialConfig::default());
        trial.register("learned_x", "learned_x", LearningSource::LearnedExploration);

        // Full budget: 1.0 + 0.15 * (10/10) + 0.05 permanent
        assert!((trial.exploration_boost("learned_x") - 1.20).abs() < 1e-9);

        trial.note_selection("learned_x");
        // 1.0 + 0.15 * (9/10) + 0.05
        assert!((trial.exploration_boost("learned_x") - 1.185).abs() < 1e-9);
    }

    #[test]
    fn test_boost_expires_to_permanent_bonus() {
        let mut trial = TrialGround::new(TrialConfig::default());
        trial.register("learned_x", "learned_x", LearningSource::LearnedExploration);

        for _ in 0..10 {
            assert!(trial.exploration_boost("learned_x") > 1.05);
            trial.note_selection("learned_x");
        }
        assert!(trial.boost_remaining("learned_x").is_none());
        assert!((trial.exploration_boost("learned_x") - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_manual_path_has_no_permanent_bonus() {
        let mut trial = TrialGround::new(TrialConfig::default());
        trial.register("manual_x", "manual_x", LearningSource::ManualAddition);

        for _ in 0..10 {
            trial.note_selection("manual_x");
        }
        assert_eq!(trial.exploration_boost("manual_x"), 1.0);
    }

    #[test]
    fn test_unknown_strategy_boost_is_neutral() {
        let trial = TrialGround::new(TrialConfig::default());
        assert_eq!(trial.exploration_boost("nobody"), 1.0);
    }

    #[test]
    fn test_candidate_entry_and_recovery() {
        let mut trial = TrialGround::new(TrialConfig::default());
        let weak = weak_arm("weak", 25);
        trial.observe_feedback(&weak);
        assert!(trial.culling_candidates().contains("weak"));

        // Recovery needs 1.2x the threshold
        let mut recovered = DecisionArm::new("weak", "weak");
        for _ in 0..25 {
            recovered.record_selection();
            recovered.update_performance(true, 0.3);
        }
        trial.observe_feedback(&recovered);
        assert!(!trial.culling_candidates().contains("weak"));
    }

    #[test]
    fn test_under_sampled_arm_never_flagged() {
        let mut trial = TrialGround::new(TrialConfig::default());
        let young = weak_arm("young", 10);
        trial.observe_feedback(&young);
        assert!(trial.culling_candidates().is_empty());
    }

    #[test]
    fn test_consecutive_failures_cull() {
        let mut trial = TrialGround::new(TrialConfig::default());
        let mut arms = HashMap::new();

        // 5/25 success rate with 20 failures in a row
        let mut arm = DecisionArm::new("failing", "failing");
        for _ in 0..5 {
            arm.record_selection();
            arm.update_performance(true, 0.1);
        }
        for _ in 0..20 {
            arm.record_selection();
            arm.update_performance(false, -0.3);
        }
        trial.observe_feedback(&arm);
        assert!(trial.culling_candidates().contains("failing"));
        arms.insert("failing".to_string(), arm);

        let golden = GoldenRegistry::default();
        let report = trial.execute_culling(&mut arms, &golden);
        assert_eq!(report.culled.len(), 1);
        assert!(report.culled[0].reason.contains("consecutive"));
        assert!(!arms.contains_key("failing"));
        assert_eq!(trial.culled_paths().len(), 1);
    }

    #[test]
    fn test_golden_protection_clears_candidacy() {
        let mut trial = TrialGround::new(TrialConfig::default());
        let mut arms = HashMap::new();

        let arm = weak_arm("protected", 60);
        trial.observe_feedback(&arm);
        assert!(trial.culling_candidates().contains("protected"));
        arms.insert("protected".to_string(), arm.clone());

        let mut golden = GoldenRegistry::default();
        golden.force_promote(&arm, "operator_override");

        let report = trial.execute_culling(&mut arms, &golden);
        assert!(report.culled.is_empty());
        assert!(arms.contains_key("protected"));
        // Candidacy is cleared, not left to nag forever
        assert!(!trial.culling_candidates().contains("protected"));
    }

    #[test]
    fn test_heavy_use_below_threshold_culls() {
        let mut trial = TrialGround::new(TrialConfig {
            consecutive_failures_limit: 1000,
            ..TrialConfig::default()
        });
        let mut arms = HashMap::new();

        let arm = weak_arm("hopeless", 60);
        trial.observe_feedback(&arm);
        arms.insert("hopeless".to_string(), arm);

        let report = trial.execute_culling(&mut arms, &GoldenRegistry::default());
        assert_eq!(report.culled.len(), 1);
        assert!(report.culled[0].reason.contains("activations"));
    }

    #[test]
    fn test_learned_path_protection_window() {
        let mut trial = TrialGround::new(TrialConfig {
            // Effectively infinite failure tolerance so only the learned
            // rules apply
            consecutive_failures_limit: 1000,
            ..TrialConfig::default()
        });
        trial.register("learned_y", "learned_y", LearningSource::LearnedExploration);

        let mut arms = HashMap::new();
        // 0% success over 30 samples, freshly registered
        let mut arm = DecisionArm::new("learned_y", "learned_y");
        for _ in 0..30 {
            arm.record_selection();
            arm.update_performance(false, -0.5);
        }
        trial.observe_feedback(&arm);
        arms.insert("learned_y".to_string(), arm);

        let report = trial.execute_culling(&mut arms, &GoldenRegistry::default());
        // Inside the 3600s protection window: spared
        assert!(report.culled.is_empty());
        assert!(arms.contains_key("learned_y"));

        // Expire the protection window and re-flag
        trial
            .learned_paths
            .get_mut("learned_y")
            .unwrap()
            .trial_start = Utc::now() - Duration::seconds(3700);
        trial.observe_feedback(arms.get("learned_y").unwrap());
        let report = trial.execute_culling(&mut arms, &GoldenRegistry::default());
        assert_eq!(report.culled.len(), 1);
        assert!(report.culled[0].was_learned);
    }

    #[test]
    fn test_watch_duration_cull() {
        let mut trial = TrialGround::new(TrialConfig {
            consecutive_failures_limit: 1000,
            ..TrialConfig::default()
        });
        let mut arms = HashMap::new();

        // Below 0.8 * threshold but only 25 activations (not > 50)
        let arm = weak_arm("watched", 25);
        trial.observe_feedback(&arm);
        arms.insert("watched".to_string(), arm);

        // Fresh on the watch list: spared
        let report = trial.execute_culling(&mut arms, &GoldenRegistry::default());
        assert!(report.culled.is_empty());

        // Re-flag and backdate the watch entry past the duration threshold
        trial.observe_feedback(arms.get("watched").unwrap());
        trial
            .performance_watch_list
            .get_mut("watched")
            .unwrap()
            .added_at = Utc::now() - Duration::seconds(2000);
        let report = trial.execute_culling(&mut arms, &GoldenRegistry::default());
        assert_eq!(report.culled.len(), 1);
        assert!(report.culled[0].reason.contains("sustained"));
    }

    #[test]
    fn test_culled_history_bounded() {
        let mut trial = TrialGround::new(TrialConfig {
            max_culled_history: 5,
            consecutive_failures_limit: 1000,
            ..TrialConfig::default()
        });
        for i in 0..10 {
            let id = format!("weak_{i}");
            let mut arms = HashMap::new();
            let arm = weak_arm(&id, 60);
            trial.observe_feedback(&arm);
            arms.insert(id, arm);
            trial.execute_culling(&mut arms, &GoldenRegistry::default());
        }
        assert!(trial.culled_paths().len() <= 5);
    }

    #[test]
    fn test_maintenance_cleans_spent_boosts() {
        let mut trial = TrialGround::new(TrialConfig::default());
        trial.register("a", "a", LearningSource::LearnedExploration);
        // Simulate a stale zero entry
        trial.exploration_boost_active.insert("a".to_string(), 0);
        trial.run_maintenance();
        assert!(!trial.has_active_boosts());
    }

    #[test]
    fn test_analytics_snapshot() {
        let mut trial = TrialGround::new(TrialConfig::default());
        trial.register("a", "a", LearningSource::LearnedExploration);
        trial.register("b", "b", LearningSource::ManualAddition);
        let analytics = trial.analytics();
        assert_eq!(analytics.learned_path_count, 2);
        assert_eq!(analytics.boosted_path_count, 2);
        assert_eq!(analytics.culling_candidate_count, 0);
    }
}
