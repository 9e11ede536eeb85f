//! Five-stage decision pipeline.
//!
//! `CognitiveCore` owns every mutable subsystem and runs the
//! verify-then-learn loop: seed, seed verification, path generation,
//! per-path verification with instant bandit feedback, final selection.
//! The decide/plan surface never returns an error; every failure mode
//! degrades into a well-formed result with flags set.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::golden::GoldenTemplate;
use crate::interpreter::{Plan, StrategyInterpreter};
use crate::llm::{LlmMultiplexer, MultiplexerStats};
use crate::mab::{
    DecisionArm, FeedbackSource, MabSelector, SelectionAlgorithm, SelectionMethod, SourceStats,
};
use crate::paths::{PathGenerator, ReasoningPath};
use crate::reasoner::{PriorReasoner, Triage};
use crate::state::CoreSnapshot;
use crate::tools::ToolRegistry;
use crate::trial::{CullingReport, TrialAnalytics};
use crate::verifier::{IdeaVerifier, ToolVerifier, VerificationOutcome};

/// One verified candidate path.
#[derive(Debug, Clone)]
pub struct VerifiedPath {
    pub path: ReasoningPath,
    pub feasibility_score: f64,
    pub reward_score: f64,
    pub is_feasible: bool,
}

/// Aggregate verification statistics for one decision.
#[derive(Debug, Clone, Default)]
pub struct VerificationStats {
    pub seed_feasibility: f64,
    pub seed_reward: f64,
    pub paths_verified: usize,
    pub feasible_paths: usize,
    pub infeasible_paths: usize,
    pub all_paths_infeasible: bool,
    pub average_path_feasibility: f64,
}

/// Wall-clock seconds per stage.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    pub seed_secs: f64,
    pub seed_verification_secs: f64,
    pub path_generation_secs: f64,
    pub path_verification_secs: f64,
    pub final_selection_secs: f64,
    pub total_secs: f64,
}

/// Output of one decision.
#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub round_number: u64,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub thinking_seed: String,
    pub triage: Triage,
    pub seed_verification: VerificationOutcome,
    pub chosen_path: ReasoningPath,
    pub available_paths: Vec<ReasoningPath>,
    pub verified_paths: Vec<VerifiedPath>,
    pub verification_stats: VerificationStats,
    /// `golden_template`, `verification_enhanced_mab`, `intelligent_detour`,
    /// or `deadline_fallback`
    pub selection_algorithm: String,
    pub timings: StageTimings,
    pub degraded: bool,
}

/// Moving-average performance of one component.
#[derive(Debug, Clone, Default)]
pub struct ComponentPerf {
    pub calls: u64,
    pub avg_secs: f64,
}

impl ComponentPerf {
    fn record(&mut self, secs: f64) {
        self.calls += 1;
        self.avg_secs += (secs - self.avg_secs) / self.calls as f64;
    }
}

/// Full stats surface for callers.
#[derive(Debug, Clone)]
pub struct CoreStats {
    pub total_rounds: u64,
    pub total_selections: u64,
    pub component_performance: HashMap<String, ComponentPerf>,
    pub arms: HashMap<String, DecisionArm>,
    pub golden_templates: Vec<GoldenTemplate>,
    pub trial_ground: TrialAnalytics,
    pub feedback_sources: HashMap<FeedbackSource, SourceStats>,
    pub convergence_level: f64,
    pub converged: bool,
    pub llm: MultiplexerStats,
}

/// The meta-cognitive decision engine.
pub struct CognitiveCore {
    config: CoreConfig,
    llm: Arc<LlmMultiplexer>,
    tools: Arc<ToolRegistry>,
    reasoner: PriorReasoner,
    generator: PathGenerator,
    verifier: Arc<dyn IdeaVerifier>,
    selector: MabSelector,
    interpreter: StrategyInterpreter,
    history: RwLock<Vec<DecisionResult>>,
    total_rounds: AtomicU64,
    component_perf: RwLock<HashMap<String, ComponentPerf>>,
}

impl CognitiveCore {
    /// Build a core over the given multiplexer and tool registry. The idea
    /// verifier defaults to the `idea_verification` tool adapter.
    pub fn new(config: CoreConfig, llm: Arc<LlmMultiplexer>, tools: Arc<ToolRegistry>) -> Self {
        let verifier: Arc<dyn IdeaVerifier> = Arc::new(ToolVerifier::new(
            Arc::clone(&tools),
            config.verifier.clone(),
        ));
        Self::with_verifier(config, llm, tools, verifier)
    }

    /// Build a core whose multiplexer is assembled from `config.llm` and the
    /// given provider clients.
    pub fn with_clients(
        config: CoreConfig,
        clients: Vec<Arc<dyn crate::llm::LlmClient>>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let mut mux = LlmMultiplexer::new(config.llm.clone());
        for client in clients {
            mux = mux.with_client(client);
        }
        Self::new(config, Arc::new(mux), tools)
    }

    pub fn with_verifier(
        config: CoreConfig,
        llm: Arc<LlmMultiplexer>,
        tools: Arc<ToolRegistry>,
        verifier: Arc<dyn IdeaVerifier>,
    ) -> Self {
        let selector = MabSelector::new(
            config.mab.clone(),
            config.golden.clone(),
            config.trial.clone(),
        );
        Self::assemble(config, llm, tools, verifier, selector)
    }

    /// Deterministic core for tests: a fixed selector seed makes selections
    /// a pure function of arm state.
    pub fn with_selector_seed(
        config: CoreConfig,
        llm: Arc<LlmMultiplexer>,
        tools: Arc<ToolRegistry>,
        verifier: Arc<dyn IdeaVerifier>,
        seed: u64,
    ) -> Self {
        let selector = MabSelector::with_seed(
            config.mab.clone(),
            config.golden.clone(),
            config.trial.clone(),
            seed,
        );
        Self::assemble(config, llm, tools, verifier, selector)
    }

    fn assemble(
        config: CoreConfig,
        llm: Arc<LlmMultiplexer>,
        tools: Arc<ToolRegistry>,
        verifier: Arc<dyn IdeaVerifier>,
        selector: MabSelector,
    ) -> Self {
        Self {
            reasoner: PriorReasoner::new(Arc::clone(&llm)),
            generator: PathGenerator::new(Arc::clone(&llm)),
            interpreter: StrategyInterpreter::new(Arc::clone(&llm), Arc::clone(&tools)),
            verifier,
            selector,
            config,
            llm,
            tools,
            history: RwLock::new(Vec::new()),
            total_rounds: AtomicU64::new(0),
            component_perf: RwLock::new(HashMap::new()),
        }
    }

    pub fn selector(&self) -> &MabSelector {
        &self.selector
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Run the five-stage decision.
    pub async fn decide(&self, query: &str, ctx: &HashMap<String, Value>) -> DecisionResult {
        let started = Instant::now();
        let deadline = ctx
            .get("deadline_ms")
            .and_then(Value::as_u64)
            .map(|ms| started + std::time::Duration::from_millis(ms));
        let round = self.total_rounds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(round, query = %truncate(query, 50), "starting decision");

        let mut timings = StageTimings::default();

        // Stage 1: thinking seed
        let stage = Instant::now();
        let (thinking_seed, triage) = self.reasoner.get_thinking_seed(query, ctx).await;
        timings.seed_secs = stage.elapsed().as_secs_f64();
        self.record_component("prior_reasoner", timings.seed_secs);
        // Heuristic-only triage means the LLM layer is out (absent or failing)
        let degraded = !triage.llm_assisted;

        if past_deadline(deadline) {
            return self.deadline_result(
                round, query, thinking_seed, triage, None, Vec::new(), Vec::new(), timings,
                started, degraded,
            );
        }

        // Stage 2: seed verification
        let stage = Instant::now();
        let seed_ctx = with_stage(ctx, "thinking_seed");
        let seed_verification = self.verifier.verify(&thinking_seed, &seed_ctx).await;
        timings.seed_verification_secs = stage.elapsed().as_secs_f64();
        info!(
            feasibility = seed_verification.feasibility_score,
            reward = seed_verification.reward_score,
            "seed verified"
        );

        if past_deadline(deadline) {
            return self.deadline_result(
                round,
                query,
                thinking_seed,
                triage,
                Some(seed_verification),
                Vec::new(),
                Vec::new(),
                timings,
                started,
                degraded,
            );
        }

        // Stage 3: path generation
        let stage = Instant::now();
        let mut available_paths = self
            .generator
            .generate_paths(&thinking_seed, query, self.config.max_paths)
            .await;
        timings.path_generation_secs = stage.elapsed().as_secs_f64();
        self.record_component("path_generator", timings.path_generation_secs);

        if available_paths.is_empty() {
            // Generator contract says 1..=max, but guard anyway
            warn!("path generator produced nothing, synthesizing detour");
            available_paths.push(ReasoningPath::creative_detour(query));
        }

        if past_deadline(deadline) {
            return self.deadline_result(
                round,
                query,
                thinking_seed,
                triage,
                Some(seed_verification),
                available_paths,
                Vec::new(),
                timings,
                started,
                degraded,
            );
        }

        // Stage 4: per-path verification with instant learning
        let stage = Instant::now();
        let mut verified_paths = Vec::with_capacity(available_paths.len());
        for path in &available_paths {
            let path_ctx = with_stage(ctx, "reasoning_path");
            let proposition = format!("{}: {}", path.path_type, path.description);
            let outcome = self.verifier.verify(&proposition, &path_ctx).await;

            let is_feasible = outcome.is_feasible(self.config.verifier.feasibility_cutoff);
            self.selector.update_path_performance(
                &path.strategy_id,
                is_feasible,
                outcome.reward_score,
                FeedbackSource::ToolVerification,
            );
            verified_paths.push(VerifiedPath {
                path: path.clone(),
                feasibility_score: outcome.feasibility_score,
                reward_score: outcome.reward_score,
                is_feasible,
            });

            if past_deadline(deadline) {
                break;
            }
        }
        timings.path_verification_secs = stage.elapsed().as_secs_f64();

        let feasible_count = verified_paths.iter().filter(|v| v.is_feasible).count();
        let all_infeasible = feasible_count == 0;
        let verification_stats = VerificationStats {
            seed_feasibility: seed_verification.feasibility_score,
            seed_reward: seed_verification.reward_score,
            paths_verified: verified_paths.len(),
            feasible_paths: feasible_count,
            infeasible_paths: verified_paths.len() - feasible_count,
            all_paths_infeasible: all_infeasible,
            average_path_feasibility: if verified_paths.is_empty() {
                0.0
            } else {
                verified_paths.iter().map(|v| v.feasibility_score).sum::<f64>()
                    / verified_paths.len() as f64
            },
        };
        info!(
            feasible = feasible_count,
            total = verified_paths.len(),
            "path verification complete"
        );

        if past_deadline(deadline) {
            return self.deadline_result(
                round,
                query,
                thinking_seed,
                triage,
                Some(seed_verification),
                available_paths,
                verified_paths,
                timings,
                started,
                degraded,
            );
        }

        // Stage 5: final selection
        let stage = Instant::now();
        let (chosen_path, selection_algorithm) = if all_infeasible {
            warn!("all candidate paths infeasible, taking intelligent detour");
            (
                ReasoningPath::creative_detour(query),
                "intelligent_detour".to_string(),
            )
        } else {
            match self
                .selector
                .select_best_path(&available_paths, SelectionAlgorithm::Auto)
            {
                Some(selection) => {
                    let algorithm = match selection.method {
                        SelectionMethod::GoldenTemplate => "golden_template".to_string(),
                        _ => "verification_enhanced_mab".to_string(),
                    };
                    (selection.path, algorithm)
                }
                None => (
                    ReasoningPath::creative_detour(query),
                    "intelligent_detour".to_string(),
                ),
            }
        };
        timings.final_selection_secs = stage.elapsed().as_secs_f64();
        self.record_component(
            "mab_selector",
            timings.path_verification_secs + timings.final_selection_secs,
        );
        timings.total_secs = started.elapsed().as_secs_f64();

        info!(
            chosen = %chosen_path.strategy_id,
            algorithm = %selection_algorithm,
            "decision complete"
        );

        let result = DecisionResult {
            round_number: round,
            query: query.to_string(),
            timestamp: Utc::now(),
            thinking_seed,
            triage,
            seed_verification,
            chosen_path,
            available_paths,
            verified_paths,
            verification_stats,
            selection_algorithm,
            timings,
            degraded,
        };
        self.push_history(result.clone());
        result
    }

    /// Translate a decision into an executable plan.
    pub async fn plan(&self, query: &str, decision: &DecisionResult) -> Plan {
        let started = Instant::now();
        let mut plan = self
            .interpreter
            .interpret(&decision.chosen_path, query, &decision.thinking_seed)
            .await;
        plan.metadata
            .insert("degraded".to_string(), json!(decision.degraded));
        plan.metadata.insert(
            "selection_algorithm".to_string(),
            json!(decision.selection_algorithm),
        );
        plan.metadata
            .insert("round_number".to_string(), json!(decision.round_number));
        self.record_component("interpreter", started.elapsed().as_secs_f64());
        plan
    }

    /// Fused decide-then-plan for callers that only want the plan.
    pub async fn decide_and_plan(&self, query: &str, ctx: &HashMap<String, Value>) -> Plan {
        let decision = self.decide(query, ctx).await;
        self.plan(query, &decision).await
    }

    /// Synchronous wrapper over [`decide`](Self::decide).
    pub fn decide_blocking(&self, query: &str, ctx: &HashMap<String, Value>) -> DecisionResult {
        futures::executor::block_on(self.decide(query, ctx))
    }

    /// Synchronous wrapper over [`decide_and_plan`](Self::decide_and_plan).
    pub fn decide_and_plan_blocking(&self, query: &str, ctx: &HashMap<String, Value>) -> Plan {
        futures::executor::block_on(self.decide_and_plan(query, ctx))
    }

    /// Record an execution outcome for a strategy. Not idempotent by design.
    pub fn record_outcome(
        &self,
        strategy_id: &str,
        success: bool,
        reward: f64,
        source: FeedbackSource,
    ) {
        self.selector
            .update_path_performance(strategy_id, success, reward, source);
    }

    /// Trial-ground maintenance: boost cleanup plus a culling pass.
    pub fn run_maintenance(&self) -> CullingReport {
        self.selector.run_maintenance()
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            total_rounds: self.total_rounds.load(Ordering::SeqCst),
            total_selections: self.selector.total_selections(),
            component_performance: self
                .component_perf
                .read()
                .expect("perf lock poisoned")
                .clone(),
            arms: self.selector.arms_snapshot(),
            golden_templates: self.selector.golden_templates(),
            trial_ground: self.selector.trial_analytics(),
            feedback_sources: self.selector.source_stats(),
            convergence_level: self.selector.convergence_level(),
            converged: self.selector.check_path_convergence(),
            llm: self.llm.stats(),
        }
    }

    /// Capture learned state for persistence.
    pub fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot::capture(&self.selector, self.total_rounds.load(Ordering::SeqCst))
    }

    /// Restore learned state from a snapshot.
    pub fn restore(&self, snapshot: CoreSnapshot) -> crate::error::Result<()> {
        let rounds = snapshot.restore(&self.selector)?;
        self.total_rounds.store(rounds, Ordering::SeqCst);
        Ok(())
    }

    pub fn decision_history(&self) -> Vec<DecisionResult> {
        self.history.read().expect("history lock poisoned").clone()
    }

    #[allow(clippy::too_many_arguments)]
    fn deadline_result(
        &self,
        round: u64,
        query: &str,
        thinking_seed: String,
        triage: Triage,
        seed_verification: Option<VerificationOutcome>,
        available_paths: Vec<ReasoningPath>,
        verified_paths: Vec<VerifiedPath>,
        mut timings: StageTimings,
        started: Instant,
        degraded: bool,
    ) -> DecisionResult {
        warn!(round, "decision deadline exceeded, returning best effort");
        // Best effort: the strongest feasible path, else anything generated,
        // else a synthesized detour
        let chosen_path = verified_paths
            .iter()
            .filter(|v| v.is_feasible)
            .max_by(|a, b| {
                a.feasibility_score
                    .partial_cmp(&b.feasibility_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|v| v.path.clone())
            .or_else(|| available_paths.first().cloned())
            .unwrap_or_else(|| ReasoningPath::creative_detour(query));

        let feasible_count = verified_paths.iter().filter(|v| v.is_feasible).count();
        timings.total_secs = started.elapsed().as_secs_f64();

        let result = DecisionResult {
            round_number: round,
            query: query.to_string(),
            timestamp: Utc::now(),
            thinking_seed,
            triage,
            seed_verification: seed_verification
                .unwrap_or_else(VerificationOutcome::neutral_fallback),
            chosen_path,
            verification_stats: VerificationStats {
                paths_verified: verified_paths.len(),
                feasible_paths: feasible_count,
                infeasible_paths: verified_paths.len() - feasible_count,
                all_paths_infeasible: !verified_paths.is_empty() && feasible_count == 0,
                ..VerificationStats::default()
            },
            available_paths,
            verified_paths,
            selection_algorithm: "deadline_fallback".to_string(),
            timings,
            degraded,
        };
        self.push_history(result.clone());
        result
    }

    fn push_history(&self, result: DecisionResult) {
        let mut history = self.history.write().expect("history lock poisoned");
        history.push(result);
        if history.len() > self.config.max_decision_history {
            let keep_from = history.len() - self.config.max_decision_history / 2;
            *history = history.split_off(keep_from);
        }
    }

    fn record_component(&self, name: &str, secs: f64) {
        let mut perf = self.component_perf.write().expect("perf lock poisoned");
        perf.entry(name.to_string()).or_default().record(secs);
    }
}

fn with_stage(ctx: &HashMap<String, Value>, stage: &str) -> HashMap<String, Value> {
    let mut out = ctx.clone();
    out.insert("stage".to_string(), json!(stage));
    out
}

fn past_deadline(deadline: Option<Instant>) -> bool {
    deadline.map(|d| Instant::now() >= d).unwrap_or(false)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
