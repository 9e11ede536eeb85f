//! Aggregate configuration for the cognitive core.
//!
//! Each component owns its config struct; this module bundles them and maps
//! the dotted option names callers use (`mab.convergence_threshold`, ...)
//! onto the typed fields.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::golden::GoldenConfig;
use crate::llm::MultiplexerConfig;
use crate::mab::MabConfig;
use crate::trial::TrialConfig;
use crate::verifier::VerifierConfig;

/// Full configuration for a `CognitiveCore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub llm: MultiplexerConfig,
    pub mab: MabConfig,
    pub golden: GoldenConfig,
    pub trial: TrialConfig,
    pub verifier: VerifierConfig,
    /// Candidate paths per decision
    pub max_paths: usize,
    /// Decision history cap (trimmed to half on overflow)
    pub max_decision_history: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self {
            llm: MultiplexerConfig::default(),
            mab: MabConfig::default(),
            golden: GoldenConfig::default(),
            trial: TrialConfig::default(),
            verifier: VerifierConfig::default(),
            max_paths: 6,
            max_decision_history: 100,
        }
    }

    /// Apply one recognized dotted option.
    ///
    /// Unknown keys and unparseable values are configuration errors; the set
    /// of recognized names is stable.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| Error::config(format!("invalid value for {key}: {value}")))
        }

        match key {
            "mab.convergence_threshold" => self.mab.convergence_threshold = parse(key, value)?,
            "mab.min_samples" => self.mab.min_samples = parse(key, value)?,
            "golden.success_rate_threshold" => {
                self.golden.success_rate_threshold = parse(key, value)?
            }
            "golden.min_samples_required" => self.golden.min_samples_required = parse(key, value)?,
            "golden.stability_window" => self.golden.stability_window = parse(key, value)?,
            "golden.max_templates" => self.golden.max_templates = parse(key, value)?,
            "trial.exploration_boost_rounds" => {
                self.trial.exploration_boost_rounds = parse(key, value)?
            }
            "trial.learned_path_bonus" => self.trial.learned_path_bonus = parse(key, value)?,
            "trial.culling_threshold" => self.trial.culling_threshold = parse(key, value)?,
            "trial.culling_min_samples" => self.trial.culling_min_samples = parse(key, value)?,
            "trial.consecutive_failures_limit" => {
                self.trial.consecutive_failures_limit = parse(key, value)?
            }
            "trial.learned_path_protection_secs" => {
                self.trial.learned_path_protection_secs = parse(key, value)?
            }
            "trial.watch_duration_secs" => self.trial.watch_duration_secs = parse(key, value)?,
            "trial.max_culled_history" => self.trial.max_culled_history = parse(key, value)?,
            "llm.max_retries" => self.llm.max_retries = parse(key, value)?,
            "llm.request_interval" => {
                let secs: f64 = parse(key, value)?;
                self.llm.request_interval_ms = (secs * 1000.0) as u64;
            }
            "llm.cache_ttl" => {
                let ttl: i64 = parse(key, value)?;
                if let Some(cache) = &mut self.llm.cache {
                    cache.ttl_secs = ttl;
                }
            }
            "llm.primary_provider" => {
                self.llm.primary_provider = if value == "auto" {
                    None
                } else {
                    Some(parse(key, value)?)
                };
            }
            "llm.fallback_providers" => {
                self.llm.fallback_providers = value
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| parse(key, s.trim()))
                    .collect::<Result<Vec<_>>>()?;
            }
            "verifier.feasibility_feasible_cutoff" => {
                self.verifier.feasibility_cutoff = parse(key, value)?
            }
            other => return Err(Error::config(format!("unrecognized option: {other}"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;

    #[test]
    fn test_defaults_match_contract() {
        let config = CoreConfig::new();
        assert_eq!(config.mab.convergence_threshold, 0.05);
        assert_eq!(config.mab.min_samples, 10);
        assert_eq!(config.golden.success_rate_threshold, 0.90);
        assert_eq!(config.golden.min_samples_required, 20);
        assert_eq!(config.golden.stability_window, 10);
        assert_eq!(config.golden.max_templates, 50);
        assert_eq!(config.trial.exploration_boost_rounds, 10);
        assert_eq!(config.trial.learned_path_bonus, 0.15);
        assert_eq!(config.trial.culling_threshold, 0.25);
        assert_eq!(config.trial.culling_min_samples, 20);
        assert_eq!(config.trial.consecutive_failures_limit, 10);
        assert_eq!(config.trial.max_culled_history, 100);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.request_interval_ms, 1000);
        assert_eq!(config.verifier.feasibility_cutoff, 0.3);
        assert_eq!(config.max_paths, 6);
    }

    #[test]
    fn test_apply_option_round_trip() {
        let mut config = CoreConfig::new();
        config.apply_option("mab.convergence_threshold", "0.1").unwrap();
        config.apply_option("trial.culling_threshold", "0.4").unwrap();
        config.apply_option("llm.request_interval", "2.5").unwrap();
        config.apply_option("llm.primary_provider", "deepseek").unwrap();
        config
            .apply_option("llm.fallback_providers", "openai, anthropic")
            .unwrap();

        assert_eq!(config.mab.convergence_threshold, 0.1);
        assert_eq!(config.trial.culling_threshold, 0.4);
        assert_eq!(config.llm.request_interval_ms, 2500);
        assert_eq!(config.llm.primary_provider, Some(Provider::DeepSeek));
        assert_eq!(
            config.llm.fallback_providers,
            vec![Provider::OpenAi, Provider::Anthropic]
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut config = CoreConfig::new();
        assert!(config.apply_option("mab.unknown", "1").is_err());
        assert!(config.apply_option("trial.culling_threshold", "abc").is_err());
    }
}
