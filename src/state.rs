//! Optional JSON persistence for learned state.
//!
//! One document with a `schema_version` carries the bandit arms, the golden
//! registry, and the trial ground. A missing file is a cold start, never an
//! error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::golden::GoldenRegistry;
use crate::mab::arm::DecisionArm;
use crate::mab::MabSelector;
use crate::trial::TrialGround;

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Serialized learned state of a cognitive core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSnapshot {
    pub schema_version: u32,
    pub arms: HashMap<String, DecisionArm>,
    pub golden: GoldenRegistry,
    pub trial: TrialGround,
    pub total_selections: u64,
    pub total_rounds: u64,
}

impl CoreSnapshot {
    /// Capture the selector's learned state.
    pub fn capture(selector: &MabSelector, total_rounds: u64) -> Self {
        selector.with_state(|state| Self {
            schema_version: SCHEMA_VERSION,
            arms: state.arms.clone(),
            golden: state.golden.clone(),
            trial: state.trial.clone(),
            total_selections: state.total_selections,
            total_rounds,
        })
    }

    /// Restore learned state into the selector, returning the persisted
    /// round counter.
    pub fn restore(self, selector: &MabSelector) -> Result<u64> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::SchemaVersion {
                found: self.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        let rounds = self.total_rounds;
        selector.with_state_mut(|state| {
            state.arms = self.arms;
            state.golden = self.golden;
            state.trial = self.trial;
            state.total_selections = self.total_selections;
        });
        Ok(rounds)
    }

    /// Write the snapshot as pretty JSON.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "core snapshot saved");
        Ok(())
    }

    /// Load a snapshot; `Ok(None)` when the file does not exist.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&json)?;
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::golden::GoldenConfig;
    use crate::mab::{FeedbackSource, MabConfig};
    use crate::trial::TrialConfig;

    fn selector() -> MabSelector {
        MabSelector::with_seed(
            MabConfig::default(),
            GoldenConfig::default(),
            TrialConfig::default(),
            1,
        )
    }

    #[test]
    fn test_snapshot_round_trip_and_replay() {
        let original = selector();
        for i in 0..40 {
            original.update_path_performance(
                "alpha",
                i % 3 != 0,
                0.4,
                FeedbackSource::UserFeedback,
            );
            original.update_path_performance("beta", i % 2 == 0, 0.1, FeedbackSource::Retrospection);
        }

        let snapshot = CoreSnapshot::capture(&original, 7);
        let restored = selector();
        let rounds = snapshot.clone().restore(&restored).unwrap();
        assert_eq!(rounds, 7);

        // Replay the same tail of feedback into both; learned state stays equal
        for _ in 0..100 {
            for s in [&original, &restored] {
                s.update_path_performance("alpha", true, 0.2, FeedbackSource::ToolVerification);
                s.update_path_performance("beta", false, -0.3, FeedbackSource::UserFeedback);
            }
        }

        let a = original.arms_snapshot();
        let b = restored.arms_snapshot();
        assert_eq!(a.len(), b.len());
        for (id, arm_a) in &a {
            let arm_b = &b[id];
            assert_eq!(arm_a.success_count, arm_b.success_count);
            assert_eq!(arm_a.failure_count, arm_b.failure_count);
            assert_eq!(arm_a.recent_results, arm_b.recent_results);
            assert_eq!(arm_a.reward_history, arm_b.reward_history);
            assert!((arm_a.total_reward - arm_b.total_reward).abs() < 1e-12);
        }
        assert_eq!(
            original
                .golden_templates()
                .iter()
                .map(|t| t.strategy_id.clone())
                .collect::<Vec<_>>(),
            restored
                .golden_templates()
                .iter()
                .map(|t| t.strategy_id.clone())
                .collect::<Vec<_>>()
        );
        assert_eq!(original.culling_candidates(), restored.culling_candidates());
    }

    #[test]
    fn test_schema_version_mismatch_rejected() {
        let s = selector();
        let mut snapshot = CoreSnapshot::capture(&s, 0);
        snapshot.schema_version = 99;
        assert!(matches!(
            snapshot.restore(&s),
            Err(Error::SchemaVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(CoreSnapshot::load_from_path(&path).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_file() {
        let s = selector();
        s.update_path_performance("alpha", true, 0.5, FeedbackSource::UserFeedback);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.json");
        CoreSnapshot::capture(&s, 3).save_to_path(&path).unwrap();

        let loaded = CoreSnapshot::load_from_path(&path).unwrap().unwrap();
        assert_eq!(loaded.schema_version, SCHEMA_VERSION);
        assert_eq!(loaded.total_rounds, 3);
        assert!(loaded.arms.contains_key("alpha"));
    }
}
