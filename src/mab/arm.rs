//! Per-strategy bandit arm state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paths::LearningSource;

/// Buffer caps with their trim-to targets.
const RECENT_REWARDS_CAP: usize = 20;
const RECENT_REWARDS_TRIM: usize = 10;
const REWARD_HISTORY_CAP: usize = 50;
const REWARD_HISTORY_TRIM: usize = 25;
const RECENT_RESULTS_CAP: usize = 50;
const RECENT_RESULTS_TRIM: usize = 25;

/// Bandit state for one strategy family.
///
/// Arms are created lazily on first reference to a `strategy_id` and die
/// only through trial-ground culling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionArm {
    pub strategy_id: String,
    pub path_type: String,
    pub source: LearningSource,

    pub success_count: u64,
    pub failure_count: u64,
    pub total_reward: f64,

    /// Most recent rewards, capped at 20 (trim to 10)
    pub recent_rewards: Vec<f64>,
    /// Longer reward history, capped at 50 (trim to 25)
    pub reward_history: Vec<f64>,
    /// Most recent success/failure outcomes, capped at 50 (trim to 25)
    pub recent_results: Vec<bool>,

    pub activation_count: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl DecisionArm {
    /// Cold arm for a static-template strategy.
    pub fn new(strategy_id: impl Into<String>, path_type: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            path_type: path_type.into(),
            source: LearningSource::StaticTemplate,
            success_count: 0,
            failure_count: 0,
            total_reward: 0.0,
            recent_rewards: Vec::new(),
            reward_history: Vec::new(),
            recent_results: Vec::new(),
            activation_count: 0,
            last_used: None,
        }
    }

    /// Arm seeded with a warm start for a newly learned or manually added
    /// strategy. The warm start is one optimistic success plus a small
    /// initial reward so the arm survives its first competitive rounds.
    pub fn warm_started(
        strategy_id: impl Into<String>,
        path_type: impl Into<String>,
        source: LearningSource,
        initial_reward: f64,
    ) -> Self {
        let mut arm = Self::new(strategy_id, path_type);
        arm.source = source;
        arm.success_count = 1;
        arm.total_reward = initial_reward;
        arm.reward_history.push(initial_reward);
        arm
    }

    /// Record one feedback event, maintaining the buffer bounds.
    pub fn update_performance(&mut self, success: bool, reward: f64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_reward += reward;

        self.recent_rewards.push(reward);
        self.reward_history.push(reward);
        self.recent_results.push(success);

        if self.recent_rewards.len() > RECENT_REWARDS_CAP {
            self.recent_rewards = self
                .recent_rewards
                .split_off(self.recent_rewards.len() - RECENT_REWARDS_TRIM);
        }
        if self.reward_history.len() > REWARD_HISTORY_CAP {
            self.reward_history = self
                .reward_history
                .split_off(self.reward_history.len() - REWARD_HISTORY_TRIM);
        }
        if self.recent_results.len() > RECENT_RESULTS_CAP {
            self.recent_results = self
                .recent_results
                .split_off(self.recent_results.len() - RECENT_RESULTS_TRIM);
        }

        self.last_used = Some(Utc::now());
    }

    /// Record that this arm was selected.
    ///
    /// `activation_count` counts selections, not feedback events, so that
    /// paired select-then-feedback usage keeps it equal to the sample count.
    pub fn record_selection(&mut self) {
        self.activation_count += 1;
        self.last_used = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        self.success_count as f64 / (total.max(1)) as f64
    }

    pub fn total_samples(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn average_reward(&self) -> f64 {
        if self.recent_rewards.is_empty() {
            0.0
        } else {
            self.recent_rewards.iter().sum::<f64>() / self.recent_rewards.len() as f64
        }
    }

    /// Mean of `reward_history` mapped from [-1, 1] into [0, 1].
    pub fn reward_blend(&self) -> Option<f64> {
        if self.reward_history.is_empty() {
            return None;
        }
        let mean = self.reward_history.iter().sum::<f64>() / self.reward_history.len() as f64;
        Some(((mean + 1.0) / 2.0).clamp(0.0, 1.0))
    }

    /// Failures-in-a-row counted back from the latest result.
    pub fn consecutive_failures(&self) -> u32 {
        self.recent_results
            .iter()
            .rev()
            .take_while(|&&ok| !ok)
            .count() as u32
    }

    /// Success rate over the last `window` recorded results, when at least
    /// `window` results exist.
    pub fn recent_window_success_rate(&self, window: usize) -> Option<f64> {
        if self.recent_results.len() < window || window == 0 {
            return None;
        }
        let slice = &self.recent_results[self.recent_results.len() - window..];
        Some(slice.iter().filter(|&&ok| ok).count() as f64 / window as f64)
    }

    /// Stability of recent performance: low variance across sliding
    /// 5-result windows maps to a high score.
    pub fn stability_score(&self) -> f64 {
        if self.total_samples() < 10 {
            return 0.0;
        }
        let tail: Vec<&bool> = self
            .recent_results
            .iter()
            .rev()
            .take(20)
            .collect();
        if tail.len() < 5 {
            return 0.5;
        }
        let window = 5;
        let rates: Vec<f64> = tail
            .windows(window)
            .map(|w| w.iter().filter(|&&&ok| ok).count() as f64 / window as f64)
            .collect();
        if rates.len() < 2 {
            return 0.5;
        }
        let mean = rates.iter().sum::<f64>() / rates.len() as f64;
        let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;
        (1.0 - variance * 4.0).max(0.0)
    }
}
