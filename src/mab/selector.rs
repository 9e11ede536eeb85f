//! Bandit selection over strategy arms.
//!
//! Thompson sampling, a UCB variant, and ε-greedy share one arms map; the
//! algorithm is picked automatically from the convergence level unless the
//! caller pins one. Golden templates short-circuit selection entirely, and
//! the trial ground shapes scores through exploration boosts.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::Beta;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::golden::{GoldenConfig, GoldenRegistry, GoldenTemplate};
use crate::paths::{LearningSource, ReasoningPath};
use crate::trial::{CullingReport, TrialAnalytics, TrialConfig, TrialGround};

use super::arm::DecisionArm;

const SELECTION_HISTORY_CAP: usize = 100;
const SELECTION_HISTORY_TRIM: usize = 50;

/// Bandit tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MabConfig {
    /// Variance bound for convergence detection
    pub convergence_threshold: f64,
    /// Minimum total samples before convergence can be declared
    pub min_samples: u64,
}

impl Default for MabConfig {
    fn default() -> Self {
        Self {
            convergence_threshold: 0.05,
            min_samples: 10,
        }
    }
}

/// Selection algorithm choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionAlgorithm {
    Auto,
    ThompsonSampling,
    UcbVariant,
    EpsilonGreedy,
}

impl std::fmt::Display for SelectionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::ThompsonSampling => "thompson_sampling",
            Self::UcbVariant => "ucb_variant",
            Self::EpsilonGreedy => "epsilon_greedy",
        };
        write!(f, "{name}")
    }
}

/// How a selection was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// A golden template matched and bypassed the bandit
    GoldenTemplate,
    /// Single candidate, returned without a draw
    SingleCandidate,
    /// Bandit algorithm ran
    Algorithm(SelectionAlgorithm),
}

/// One selection outcome.
#[derive(Debug, Clone)]
pub struct Selection {
    pub path: ReasoningPath,
    pub method: SelectionMethod,
}

/// Source of a feedback event, with its reward weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    UserFeedback,
    Retrospection,
    AutoEvaluation,
    ToolVerification,
}

impl FeedbackSource {
    pub fn weight(&self) -> f64 {
        match self {
            Self::UserFeedback => 1.0,
            Self::Retrospection => 0.8,
            Self::AutoEvaluation => 0.6,
            Self::ToolVerification => 0.9,
        }
    }
}

/// Per-source feedback accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub count: u64,
    pub successes: u64,
    pub reward_sum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub strategy_id: String,
    pub algorithm: String,
    pub round: u64,
}

/// Per-algorithm win/loss accounting tied to subsequent feedback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlgorithmStats {
    pub selections: u64,
    pub successes: u64,
}

/// Everything behind the selector's single readers-writer lock.
#[derive(Debug)]
pub(crate) struct SelectorState {
    pub arms: HashMap<String, DecisionArm>,
    pub golden: GoldenRegistry,
    pub trial: TrialGround,
    pub total_selections: u64,
    pub selection_history: Vec<SelectionRecord>,
    pub algorithm_stats: HashMap<String, AlgorithmStats>,
    pub source_stats: HashMap<FeedbackSource, SourceStats>,
    rng: StdRng,
}

/// Per-strategy bandit with golden fast path and trial-ground lifecycle.
pub struct MabSelector {
    config: MabConfig,
    state: RwLock<SelectorState>,
}

impl MabSelector {
    pub fn new(config: MabConfig, golden: GoldenConfig, trial: TrialConfig) -> Self {
        Self::with_seed(config, golden, trial, rand::thread_rng().gen())
    }

    /// Deterministic construction: fixing the seed and the arm state fixes
    /// every selection.
    pub fn with_seed(
        config: MabConfig,
        golden: GoldenConfig,
        trial: TrialConfig,
        seed: u64,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(SelectorState {
                arms: HashMap::new(),
                golden: GoldenRegistry::new(golden),
                trial: TrialGround::new(trial),
                total_selections: 0,
                selection_history: Vec::new(),
                algorithm_stats: HashMap::new(),
                source_stats: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Ensure an arm exists for the path, applying the warm start its
    /// learning source earns. Learned and manual strategies also register
    /// in the trial ground.
    fn ensure_arm(state: &mut SelectorState, path: &ReasoningPath) {
        if state.arms.contains_key(&path.strategy_id) {
            return;
        }
        let arm = match path.learning_source {
            LearningSource::LearnedExploration => {
                state
                    .trial
                    .register(&path.strategy_id, &path.path_type, path.learning_source);
                info!(strategy_id = %path.strategy_id, "learned strategy entering trial with warm start");
                DecisionArm::warm_started(
                    &path.strategy_id,
                    &path.path_type,
                    path.learning_source,
                    0.3,
                )
            }
            LearningSource::ManualAddition => {
                state
                    .trial
                    .register(&path.strategy_id, &path.path_type, path.learning_source);
                DecisionArm::warm_started(
                    &path.strategy_id,
                    &path.path_type,
                    path.learning_source,
                    0.2,
                )
            }
            _ => DecisionArm::new(&path.strategy_id, &path.path_type),
        };
        state.arms.insert(path.strategy_id.clone(), arm);
    }

    /// Select the best path from the candidates.
    ///
    /// Returns `None` only for an empty candidate list. A single candidate
    /// is returned unchanged without consuming randomness, though its
    /// selection is still recorded (activation, boost decay, history).
    pub fn select_best_path(
        &self,
        paths: &[ReasoningPath],
        algorithm: SelectionAlgorithm,
    ) -> Option<Selection> {
        if paths.is_empty() {
            return None;
        }

        let mut state = self.state.write().expect("selector lock poisoned");
        let state = &mut *state;

        // Golden fast path comes before anything else
        if let Some(matched) = state.golden.best_match(paths) {
            let path = paths[matched.path_index].clone();
            state.golden.record_template_use(&matched, &path);
            state.total_selections += 1;
            Self::push_history(state, &path.strategy_id, "golden_template");
            info!(
                strategy_id = %path.strategy_id,
                score = matched.match_score,
                "golden template bypassed bandit selection"
            );
            return Some(Selection {
                path,
                method: SelectionMethod::GoldenTemplate,
            });
        }

        for path in paths {
            Self::ensure_arm(state, path);
        }

        state.total_selections += 1;

        if paths.len() == 1 {
            let path = paths[0].clone();
            Self::finish_selection(state, &path.strategy_id, "single_candidate");
            return Some(Selection {
                path,
                method: SelectionMethod::SingleCandidate,
            });
        }

        let chosen_algorithm = match algorithm {
            SelectionAlgorithm::Auto => Self::auto_algorithm(state, &self.config),
            fixed => fixed,
        };

        let candidate_ids: Vec<&str> = paths.iter().map(|p| p.strategy_id.as_str()).collect();
        let winner = match chosen_algorithm {
            SelectionAlgorithm::ThompsonSampling => Self::thompson(state, &candidate_ids),
            SelectionAlgorithm::UcbVariant => Self::ucb(state, &candidate_ids),
            SelectionAlgorithm::EpsilonGreedy => Self::epsilon_greedy(state, &candidate_ids),
            SelectionAlgorithm::Auto => unreachable!("auto resolved above"),
        };

        // Map the winning strategy back to its candidate instance
        let path = paths
            .iter()
            .find(|p| p.strategy_id == winner)
            .unwrap_or(&paths[0])
            .clone();

        Self::finish_selection(state, &path.strategy_id, &chosen_algorithm.to_string());
        debug!(
            strategy_id = %path.strategy_id,
            algorithm = %chosen_algorithm,
            "bandit selected path"
        );

        Some(Selection {
            path,
            method: SelectionMethod::Algorithm(chosen_algorithm),
        })
    }

    fn finish_selection(state: &mut SelectorState, strategy_id: &str, algorithm: &str) {
        if let Some(arm) = state.arms.get_mut(strategy_id) {
            arm.record_selection();
        }
        state.trial.note_selection(strategy_id);
        state
            .algorithm_stats
            .entry(algorithm.to_string())
            .or_default()
            .selections += 1;
        Self::push_history(state, strategy_id, algorithm);
    }

    fn push_history(state: &mut SelectorState, strategy_id: &str, algorithm: &str) {
        let round = state.total_selections;
        state.selection_history.push(SelectionRecord {
            strategy_id: strategy_id.to_string(),
            algorithm: algorithm.to_string(),
            round,
        });
        if state.selection_history.len() > SELECTION_HISTORY_CAP {
            state.selection_history = state
                .selection_history
                .split_off(state.selection_history.len() - SELECTION_HISTORY_TRIM);
        }
    }

    /// Algorithm choice when the caller asked for `auto`.
    fn auto_algorithm(state: &SelectorState, config: &MabConfig) -> SelectionAlgorithm {
        if state.total_selections < 15 {
            return SelectionAlgorithm::ThompsonSampling;
        }
        let level = Self::convergence_level_inner(state);
        if level < 0.4 {
            SelectionAlgorithm::ThompsonSampling
        } else if level < 0.7 {
            SelectionAlgorithm::UcbVariant
        } else {
            SelectionAlgorithm::EpsilonGreedy
        }
    }

    /// `max(0, 1 - 3.5 * Var(success rates))` over arms with samples.
    fn convergence_level_inner(state: &SelectorState) -> f64 {
        let rates: Vec<f64> = state
            .arms
            .values()
            .filter(|a| a.total_samples() > 0)
            .map(|a| a.success_rate())
            .collect();
        if rates.len() < 2 {
            return 0.0;
        }
        (1.0 - variance(&rates) * 3.5).max(0.0)
    }

    pub fn convergence_level(&self) -> f64 {
        let state = self.state.read().expect("selector lock poisoned");
        Self::convergence_level_inner(&state)
    }

    // --- Thompson sampling -------------------------------------------------

    fn thompson(state: &mut SelectorState, candidates: &[&str]) -> String {
        let total_selections = state.total_selections;
        let mut best: Option<(&str, f64)> = None;

        for &strategy_id in candidates {
            let Some(arm) = state.arms.get(strategy_id) else {
                continue;
            };
            let alpha = (arm.success_count + 1) as f64;
            let beta = (arm.failure_count + 1) as f64;
            let mut score = match Beta::new(alpha, beta) {
                Ok(dist) => state.rng.sample(dist),
                Err(_) => state.rng.gen::<f64>(),
            };

            if let Some(blend) = arm.reward_blend() {
                score = score * 0.8 + blend * 0.2;
            }

            score *= state.trial.exploration_boost(strategy_id);

            let usage_penalty =
                (0.2 * arm.activation_count as f64 / (total_selections as f64 + 1.0)).min(0.1);
            score = (score - usage_penalty).max(0.0);

            best = match best {
                Some((_, best_score)) if score <= best_score => best,
                _ => Some((strategy_id, score)),
            };
        }

        Self::resolve_winner(state, best, candidates)
    }

    // --- UCB variant -------------------------------------------------------

    fn ucb(state: &mut SelectorState, candidates: &[&str]) -> String {
        // Untried arms come first, boosted learned strategies ahead of the rest
        let untried: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|id| {
                state
                    .arms
                    .get(*id)
                    .map(|a| a.activation_count == 0)
                    .unwrap_or(false)
            })
            .collect();
        if !untried.is_empty() {
            let winner = untried
                .iter()
                .copied()
                .max_by(|a, b| {
                    state
                        .trial
                        .exploration_boost(a)
                        .partial_cmp(&state.trial.exploration_boost(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        // Lexicographically smaller id wins ties
                        .then_with(|| b.cmp(a))
                })
                .unwrap_or(untried[0]);
            return winner.to_string();
        }

        let total_rounds: u64 = candidates
            .iter()
            .filter_map(|id| state.arms.get(*id))
            .map(|a| a.activation_count)
            .sum();

        let mut best: Option<(&str, f64)> = None;
        for &strategy_id in candidates {
            let Some(arm) = state.arms.get(strategy_id) else {
                continue;
            };
            let mut base = match arm.reward_blend() {
                Some(blend) => 0.7 * arm.success_rate() + 0.3 * blend,
                None => arm.success_rate(),
            };
            // Boost multiplies the base value only; the confidence term is
            // added separately on purpose
            base *= state.trial.exploration_boost(strategy_id);

            let confidence = (2.0 * (total_rounds as f64).ln() / arm.activation_count as f64)
                .sqrt();
            let ucb_value = base + 1.2 * confidence;

            best = match best {
                Some((best_id, best_score)) => {
                    if ucb_value > best_score
                        || (ucb_value == best_score && strategy_id < best_id)
                    {
                        Some((strategy_id, ucb_value))
                    } else {
                        Some((best_id, best_score))
                    }
                }
                None => Some((strategy_id, ucb_value)),
            };
        }

        Self::resolve_winner(state, best, candidates)
    }

    // --- Epsilon-greedy ----------------------------------------------------

    fn epsilon_greedy(state: &mut SelectorState, candidates: &[&str]) -> String {
        let total_activations: u64 = candidates
            .iter()
            .filter_map(|id| state.arms.get(*id))
            .map(|a| a.activation_count)
            .sum();

        let mut epsilon = (0.4 / (1.0 + total_activations as f64 * 0.008)).max(0.1);
        let boosted: Vec<&str> = candidates
            .iter()
            .copied()
            .filter(|id| state.trial.exploration_boost(id) > 1.0)
            .collect();
        if !boosted.is_empty() {
            epsilon = (epsilon * 1.3).min(0.6);
        }

        if state.rng.gen::<f64>() < epsilon {
            // Explore, preferring boosted strategies 70% of the time
            let pool: &[&str] = if !boosted.is_empty() && state.rng.gen::<f64>() < 0.7 {
                &boosted
            } else {
                candidates
            };
            let pick = pool[state.rng.gen_range(0..pool.len())];
            return pick.to_string();
        }

        // Exploit: blended score with a mild boost kicker
        let mut best: Option<(&str, f64)> = None;
        for &strategy_id in candidates {
            let Some(arm) = state.arms.get(strategy_id) else {
                continue;
            };
            let mut score = match arm.reward_blend() {
                Some(blend) => 0.6 * arm.success_rate() + 0.4 * blend,
                None => arm.success_rate(),
            };
            let boost = state.trial.exploration_boost(strategy_id);
            if boost > 1.0 {
                score += (boost - 1.0) * 0.1;
            }
            let usage_ratio = arm.activation_count as f64 / (total_activations as f64 + 1.0);
            if usage_ratio > 0.5 {
                score *= 0.95;
            }

            best = match best {
                Some((best_id, best_score)) => {
                    if score > best_score || (score == best_score && strategy_id < best_id) {
                        Some((strategy_id, score))
                    } else {
                        Some((best_id, best_score))
                    }
                }
                None => Some((strategy_id, score)),
            };
        }

        Self::resolve_winner(state, best, candidates)
    }

    fn resolve_winner(
        state: &mut SelectorState,
        best: Option<(&str, f64)>,
        candidates: &[&str],
    ) -> String {
        match best {
            Some((id, _)) => id.to_string(),
            None => {
                // No arms at all: uniform random fallback
                warn!("no scored arms among candidates, picking uniformly");
                candidates[state.rng.gen_range(0..candidates.len())].to_string()
            }
        }
    }

    // --- Feedback ----------------------------------------------------------

    /// Record an execution outcome for a strategy.
    ///
    /// The reward is weighted by the feedback source; retrospection keeps a
    /// small positive floor on failure to reward exploration. Promotion and
    /// culling-candidate checks run on the updated arm. Deliberately not
    /// idempotent: identical calls accumulate.
    pub fn update_path_performance(
        &self,
        strategy_id: &str,
        success: bool,
        reward: f64,
        source: FeedbackSource,
    ) {
        let mut state = self.state.write().expect("selector lock poisoned");
        let state = &mut *state;

        let adjusted = Self::adjust_reward(reward, source, success);

        let arm = state.arms.entry(strategy_id.to_string()).or_insert_with(|| {
            debug!(strategy_id, "feedback for unknown strategy, creating arm");
            DecisionArm::new(strategy_id, strategy_id)
        });
        arm.update_performance(success, adjusted);

        // Tie the outcome back to the algorithm that made the last selection
        // of this strategy
        if success {
            if let Some(record) = state
                .selection_history
                .iter()
                .rev()
                .find(|r| r.strategy_id == strategy_id)
            {
                if let Some(stats) = state.algorithm_stats.get_mut(&record.algorithm) {
                    stats.successes += 1;
                }
            }
        }

        let entry = state.source_stats.entry(source).or_default();
        entry.count += 1;
        if success {
            entry.successes += 1;
        }
        entry.reward_sum += reward;

        let arm = state.arms.get(strategy_id).expect("arm just inserted");
        state.golden.check_and_promote(arm);
        state.trial.observe_feedback(arm);
    }

    fn adjust_reward(reward: f64, source: FeedbackSource, success: bool) -> f64 {
        let weighted = reward * source.weight();
        if source == FeedbackSource::Retrospection {
            if success && reward > 0.0 {
                weighted + 0.1
            } else {
                weighted.max(0.05)
            }
        } else {
            weighted
        }
    }

    /// True iff enough samples exist and per-arm success rates have
    /// converged (variance below 1.2x the configured threshold).
    pub fn check_path_convergence(&self) -> bool {
        let state = self.state.read().expect("selector lock poisoned");
        if state.arms.len() < 2 {
            return false;
        }
        let total_samples: u64 = state.arms.values().map(|a| a.total_samples()).sum();
        if total_samples < self.config.min_samples {
            return false;
        }
        let rates: Vec<f64> = state
            .arms
            .values()
            .filter(|a| a.total_samples() > 0)
            .map(|a| a.success_rate())
            .collect();
        if rates.len() < 2 {
            return false;
        }
        variance(&rates) < self.config.convergence_threshold * 1.2
    }

    // --- Lifecycle and introspection --------------------------------------

    /// Run trial-ground maintenance: boost cleanup plus a culling pass.
    pub fn run_maintenance(&self) -> CullingReport {
        let mut state = self.state.write().expect("selector lock poisoned");
        let state = &mut *state;
        state.trial.run_maintenance();
        let SelectorState {
            arms,
            golden,
            trial,
            ..
        } = state;
        trial.execute_culling(arms, golden)
    }

    /// Operator override: promote regardless of criteria.
    pub fn force_promote_to_golden(&self, strategy_id: &str, reason: &str) -> bool {
        let mut state = self.state.write().expect("selector lock poisoned");
        let state = &mut *state;
        let Some(arm) = state.arms.get(strategy_id) else {
            return false;
        };
        state.golden.force_promote(arm, reason);
        true
    }

    pub fn revoke_golden(&self, strategy_id: &str, reason: &str) -> bool {
        let mut state = self.state.write().expect("selector lock poisoned");
        state.golden.revoke(strategy_id, reason)
    }

    pub fn golden_contains(&self, strategy_id: &str) -> bool {
        self.state
            .read()
            .expect("selector lock poisoned")
            .golden
            .contains(strategy_id)
    }

    pub fn golden_templates(&self) -> Vec<GoldenTemplate> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .golden
            .templates()
            .cloned()
            .collect()
    }

    /// Seed the registry with a pre-built template (tests, persistence).
    pub fn preload_golden_template(&self, template: GoldenTemplate) {
        self.state
            .write()
            .expect("selector lock poisoned")
            .golden
            .insert_template(template);
    }

    pub fn arm(&self, strategy_id: &str) -> Option<DecisionArm> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .arms
            .get(strategy_id)
            .cloned()
    }

    pub fn arms_snapshot(&self) -> HashMap<String, DecisionArm> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .arms
            .clone()
    }

    pub fn total_selections(&self) -> u64 {
        self.state
            .read()
            .expect("selector lock poisoned")
            .total_selections
    }

    pub fn exploration_boost(&self, strategy_id: &str) -> f64 {
        self.state
            .read()
            .expect("selector lock poisoned")
            .trial
            .exploration_boost(strategy_id)
    }

    pub fn boost_remaining(&self, strategy_id: &str) -> Option<u32> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .trial
            .boost_remaining(strategy_id)
    }

    pub fn trial_analytics(&self) -> TrialAnalytics {
        self.state
            .read()
            .expect("selector lock poisoned")
            .trial
            .analytics()
    }

    pub fn culling_candidates(&self) -> Vec<String> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .trial
            .culling_candidates()
            .iter()
            .cloned()
            .collect()
    }

    pub fn source_stats(&self) -> HashMap<FeedbackSource, SourceStats> {
        self.state
            .read()
            .expect("selector lock poisoned")
            .source_stats
            .clone()
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&SelectorState) -> T) -> T {
        let state = self.state.read().expect("selector lock poisoned");
        f(&state)
    }

    pub(crate) fn with_state_mut<T>(&self, f: impl FnOnce(&mut SelectorState) -> T) -> T {
        let mut state = self.state.write().expect("selector lock poisoned");
        f(&mut state)
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn selector() -> MabSelector {
        MabSelector::with_seed(
            MabConfig::default(),
            GoldenConfig::default(),
            TrialConfig::default(),
            42,
        )
    }

    fn path(family: &str) -> ReasoningPath {
        ReasoningPath::new(family, format!("{family} description"), "template")
    }

    fn learned_path(family: &str) -> ReasoningPath {
        path(family).with_source(LearningSource::LearnedExploration)
    }

    #[test]
    fn test_empty_candidates_returns_none() {
        assert!(selector()
            .select_best_path(&[], SelectionAlgorithm::Auto)
            .is_none());
    }

    #[test]
    fn test_single_candidate_returned_unchanged() {
        let s = selector();
        let candidate = path("systematic_analytical");
        let selection = s
            .select_best_path(std::slice::from_ref(&candidate), SelectionAlgorithm::Auto)
            .unwrap();

        assert_eq!(selection.method, SelectionMethod::SingleCandidate);
        assert_eq!(selection.path, candidate);
        // Selection is still recorded
        assert_eq!(s.arm("systematic_analytical").unwrap().activation_count, 1);
        assert_eq!(s.total_selections(), 1);
    }

    #[test]
    fn test_selection_is_deterministic_under_fixed_seed() {
        let paths = vec![
            path("systematic_analytical"),
            path("critical_questioning"),
            path("creative_innovative"),
        ];
        let run = |seed: u64| {
            let s = MabSelector::with_seed(
                MabConfig::default(),
                GoldenConfig::default(),
                TrialConfig::default(),
                seed,
            );
            (0..10)
                .map(|_| {
                    s.select_best_path(&paths, SelectionAlgorithm::ThompsonSampling)
                        .unwrap()
                        .path
                        .strategy_id
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_lazy_arm_creation_with_warm_start() {
        let s = selector();
        let paths = vec![path("systematic_analytical"), learned_path("learned_trick")];
        s.select_best_path(&paths, SelectionAlgorithm::ThompsonSampling)
            .unwrap();

        let cold = s.arm("systematic_analytical").unwrap();
        assert_eq!(cold.total_reward, 0.0);

        let warm = s.arm("learned_trick").unwrap();
        assert_eq!(warm.success_count, 1);
        assert!((warm.total_reward - 0.3).abs() < 1e-9);
        assert_eq!(warm.reward_history, vec![0.3]);
        assert!(s.boost_remaining("learned_trick").is_some());
    }

    #[test]
    fn test_manual_addition_smaller_warm_start() {
        let s = selector();
        let manual = path("manual_tactic").with_source(LearningSource::ManualAddition);
        s.select_best_path(&[manual, path("systematic_analytical")], SelectionAlgorithm::ThompsonSampling)
            .unwrap();

        let arm = s.arm("manual_tactic").unwrap();
        assert!((arm.total_reward - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_instances_share_one_arm() {
        let s = selector();
        let a = path("systematic_analytical");
        let b = path("systematic_analytical");
        assert_ne!(a.instance_id, b.instance_id);

        s.select_best_path(&[a, b, path("critical_questioning")], SelectionAlgorithm::ThompsonSampling)
            .unwrap();
        assert!(s.arm("systematic_analytical").is_some());
        assert_eq!(s.arms_snapshot().len(), 2);
    }

    #[test]
    fn test_ucb_prefers_untried_arm() {
        let s = selector();
        let paths = vec![path("seasoned"), path("fresh")];

        // Give "seasoned" history so only "fresh" is untried
        for _ in 0..5 {
            s.update_path_performance("seasoned", true, 0.5, FeedbackSource::UserFeedback);
        }
        s.with_state_mut(|state| {
            state.arms.get_mut("seasoned").unwrap().activation_count = 5;
        });

        let selection = s.select_best_path(&paths, SelectionAlgorithm::UcbVariant).unwrap();
        assert_eq!(selection.path.strategy_id, "fresh");
    }

    #[test]
    fn test_bandit_learns_better_arm() {
        let s = selector();
        let paths = vec![path("good"), path("bad")];

        for _ in 0..30 {
            s.update_path_performance("good", true, 0.8, FeedbackSource::UserFeedback);
            s.update_path_performance("bad", false, -0.5, FeedbackSource::UserFeedback);
        }

        let mut good_wins = 0;
        for _ in 0..50 {
            let chosen = s
                .select_best_path(&paths, SelectionAlgorithm::ThompsonSampling)
                .unwrap();
            if chosen.path.strategy_id == "good" {
                good_wins += 1;
            }
        }
        assert!(good_wins > 35, "good arm won only {good_wins}/50");
    }

    #[test]
    fn test_auto_uses_thompson_early() {
        let s = selector();
        let paths = vec![path("a"), path("b")];
        let selection = s.select_best_path(&paths, SelectionAlgorithm::Auto).unwrap();
        assert_eq!(
            selection.method,
            SelectionMethod::Algorithm(SelectionAlgorithm::ThompsonSampling)
        );
    }

    #[test]
    fn test_auto_switches_with_convergence() {
        let s = selector();
        let paths = vec![path("a"), path("b")];

        // Same success rates: variance 0, convergence level 1.0
        for _ in 0..20 {
            s.update_path_performance("a", true, 0.5, FeedbackSource::UserFeedback);
            s.update_path_performance("b", true, 0.5, FeedbackSource::UserFeedback);
        }
        s.with_state_mut(|state| state.total_selections = 20);

        let selection = s.select_best_path(&paths, SelectionAlgorithm::Auto).unwrap();
        assert_eq!(
            selection.method,
            SelectionMethod::Algorithm(SelectionAlgorithm::EpsilonGreedy)
        );
    }

    #[test]
    fn test_convergence_check() {
        let s = selector();
        assert!(!s.check_path_convergence());

        for _ in 0..10 {
            s.update_path_performance("a", true, 0.5, FeedbackSource::UserFeedback);
            s.update_path_performance("b", true, 0.5, FeedbackSource::UserFeedback);
        }
        assert!(s.check_path_convergence());

        // Push the rates apart
        for _ in 0..20 {
            s.update_path_performance("b", false, -0.5, FeedbackSource::UserFeedback);
        }
        assert!(!s.check_path_convergence());
    }

    #[test]
    fn test_feedback_source_weighting() {
        let s = selector();
        s.update_path_performance("x", true, 1.0, FeedbackSource::AutoEvaluation);
        let arm = s.arm("x").unwrap();
        assert!((arm.total_reward - 0.6).abs() < 1e-9);

        s.update_path_performance("y", true, 1.0, FeedbackSource::Retrospection);
        let arm = s.arm("y").unwrap();
        // 1.0 * 0.8 + 0.1 success bonus
        assert!((arm.total_reward - 0.9).abs() < 1e-9);

        s.update_path_performance("z", false, -0.4, FeedbackSource::Retrospection);
        let arm = s.arm("z").unwrap();
        // Failed retrospection keeps a 0.05 exploration floor
        assert!((arm.total_reward - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_record_outcome_not_idempotent() {
        let s = selector();
        s.update_path_performance("x", true, 0.5, FeedbackSource::UserFeedback);
        s.update_path_performance("x", true, 0.5, FeedbackSource::UserFeedback);
        let arm = s.arm("x").unwrap();
        assert_eq!(arm.success_count, 2);
        assert!((arm.total_reward - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_golden_fast_path_bypasses_bandit() {
        let s = selector();
        let now = Utc::now();
        s.preload_golden_template(GoldenTemplate {
            strategy_id: "systematic_analytical".to_string(),
            path_type: "systematic_analytical".to_string(),
            description: String::new(),
            success_rate: 0.97,
            activation_count: 30,
            average_reward: 0.6,
            stability_score: 0.9,
            created_at: now,
            last_updated: now,
            usage_as_template: 0,
            promotion_reason: "test".to_string(),
        });

        let paths = vec![path("creative_innovative"), path("systematic_analytical")];
        let selection = s.select_best_path(&paths, SelectionAlgorithm::Auto).unwrap();

        assert_eq!(selection.method, SelectionMethod::GoldenTemplate);
        assert_eq!(selection.path.strategy_id, "systematic_analytical");
        let template = &s
            .golden_templates()
            .into_iter()
            .find(|t| t.strategy_id == "systematic_analytical")
            .unwrap();
        assert_eq!(template.usage_as_template, 1);
        // The bandit arm never saw this selection
        assert!(s.arm("systematic_analytical").is_none());
    }

    #[test]
    fn test_boost_decay_trajectory() {
        let s = selector();
        let learned = learned_path("learned_strategy");

        // First reference creates the arm and activates the boost
        s.select_best_path(std::slice::from_ref(&learned), SelectionAlgorithm::Auto)
            .unwrap();
        assert!(s.exploration_boost("learned_strategy") > 1.05);

        for _ in 1..10 {
            assert!(s.exploration_boost("learned_strategy") > 1.05);
            s.select_best_path(std::slice::from_ref(&learned), SelectionAlgorithm::Auto)
                .unwrap();
        }
        // Ten selections spent the budget
        assert!(s.boost_remaining("learned_strategy").is_none());
        assert!((s.exploration_boost("learned_strategy") - 1.05).abs() < 1e-9);

        for _ in 0..2 {
            s.select_best_path(std::slice::from_ref(&learned), SelectionAlgorithm::Auto)
                .unwrap();
            assert!((s.exploration_boost("learned_strategy") - 1.05).abs() < 1e-9);
        }
    }

    #[test]
    fn test_culling_with_golden_protection() {
        let s = selector();
        let candidate = path("borderline");

        // Pair selections with failures to tank the rate at 25 activations
        for i in 0..25 {
            s.select_best_path(std::slice::from_ref(&candidate), SelectionAlgorithm::Auto)
                .unwrap();
            s.update_path_performance(
                "borderline",
                i % 10 == 0,
                -0.2,
                FeedbackSource::UserFeedback,
            );
        }
        assert!(s.culling_candidates().contains(&"borderline".to_string()));

        assert!(s.force_promote_to_golden("borderline", "operator_override"));
        let report = s.run_maintenance();

        assert!(report.culled.is_empty());
        assert!(s.arm("borderline").is_some());
        assert!(!s.culling_candidates().contains(&"borderline".to_string()));
        assert!(s.golden_contains("borderline"));
    }

    #[test]
    fn test_selection_history_bounded() {
        let s = selector();
        let paths = vec![path("a"), path("b")];
        for _ in 0..150 {
            s.select_best_path(&paths, SelectionAlgorithm::ThompsonSampling)
                .unwrap();
        }
        s.with_state(|state| {
            assert!(state.selection_history.len() <= SELECTION_HISTORY_CAP);
        });
    }

    #[test]
    fn test_golden_promotion_via_feedback() {
        let s = selector();
        let candidate = path("steady");
        for _ in 0..25 {
            s.select_best_path(std::slice::from_ref(&candidate), SelectionAlgorithm::Auto)
                .unwrap();
            s.update_path_performance("steady", true, 0.7, FeedbackSource::UserFeedback);
        }
        assert!(s.golden_contains("steady"));

        // Under-sampled arms never reach the registry
        let young = path("young");
        for _ in 0..5 {
            s.select_best_path(std::slice::from_ref(&young), SelectionAlgorithm::Auto).unwrap();
            s.update_path_performance("young", true, 0.7, FeedbackSource::UserFeedback);
        }
        assert!(!s.golden_contains("young"));
    }
}
