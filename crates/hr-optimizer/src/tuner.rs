//! Tuning run management: strategy selection, configuration and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hr_grammar::Grammar;
use hr_types::{config_error, CancellationToken, HrResult};
use tracing::info;

use crate::race::{
    Race, RaceOutcome, RacingConfig, RankedCandidate, RoundEvaluator,
    RoundSummary, StopReason,
};
use crate::sampler::{SamplerConfig, UniformSampler};

/// Unique tuning run identifier.
pub type TuningId = Uuid;

/// How candidate configurations are searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TuningStrategy {
    /// Evaluate `samples` uniformly drawn configurations on every instance.
    Random { samples: usize },
    /// Iterated racing as configured by [`RacingConfig`].
    Racing,
}

impl Default for TuningStrategy {
    fn default() -> Self {
        Self::Racing
    }
}

/// Top-level configuration for a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub name: String,
    pub strategy: TuningStrategy,
    pub sampler: SamplerConfig,
    pub racing: RacingConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            name: "tuning".to_string(),
            strategy: TuningStrategy::default(),
            sampler: SamplerConfig::default(),
            racing: RacingConfig::default(),
        }
    }
}

impl TunerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> HrResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_strategy(mut self, strategy: TuningStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.sampler.seed = seed;
        self
    }

    pub fn with_racing(mut self, racing: RacingConfig) -> Self {
        self.racing = racing;
        self
    }

    pub fn validate(&self) -> HrResult<()> {
        if let TuningStrategy::Random { samples: 0 } = self.strategy {
            return Err(config_error!("random strategy needs at least one sample"));
        }
        if matches!(self.strategy, TuningStrategy::Racing) && self.racing.initial_candidates == 0 {
            return Err(config_error!("racing needs at least one initial candidate"));
        }
        self.racing.validate().map_err(|message| config_error!("{message}"))
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningStatus {
    pub id: TuningId,
    pub name: String,
    pub state: TuningState,
    pub rounds_completed: usize,
    pub survivors: usize,
    pub best: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl TuningStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            state: TuningState::Pending,
            rounds_completed: 0,
            survivors: 0,
            best: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, candidates: usize) {
        self.state = TuningState::Running;
        self.survivors = candidates;
        self.started_at = Some(Utc::now());
    }

    pub fn record_round(&mut self, summary: &RoundSummary) {
        self.rounds_completed = summary.round;
        self.survivors = summary.survivors;
    }

    pub fn mark_finished(&mut self, outcome: &RaceOutcome) {
        self.state = if outcome.stop == StopReason::Cancelled {
            TuningState::Cancelled
        } else {
            TuningState::Completed
        };
        self.survivors = outcome.ranked.len();
        self.best = outcome.ranked.first().map(|r| r.configuration.key());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = TuningState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TuningState::Completed | TuningState::Cancelled | TuningState::Failed
        )
    }
}

/// Final result of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningOutcome {
    pub status: TuningStatus,
    /// Surviving candidates, best first.
    pub ranked: Vec<RankedCandidate>,
    pub rounds: Vec<RoundSummary>,
    pub evaluations: usize,
    pub stop: StopReason,
    pub warnings: Vec<String>,
}

impl TuningOutcome {
    pub fn best(&self) -> Option<&RankedCandidate> {
        self.ranked.first()
    }
}

/// Drives one tuning run over a grammar.
#[derive(Debug)]
pub struct Tuner {
    config: TunerConfig,
    status: TuningStatus,
    cancel: CancellationToken,
}

impl Tuner {
    pub fn new(config: TunerConfig) -> Self {
        let status = TuningStatus::new(config.name.clone());
        Self {
            config,
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn status(&self) -> &TuningStatus {
        &self.status
    }

    /// Token that stops the run before its next round.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn run<E>(&mut self, grammar: &Grammar, evaluator: &mut E, instances: &[String]) -> HrResult<TuningOutcome>
    where
        E: RoundEvaluator + ?Sized,
    {
        if let Err(e) = self.config.validate() {
            self.status.mark_failed(e.to_string());
            return Err(e);
        }

        let mut sampler = UniformSampler::new(grammar, self.config.sampler.clone());
        let (candidates, racing) = match self.config.strategy {
            TuningStrategy::Random { samples } => {
                // One round over every instance, no eliminations.
                let racing = RacingConfig {
                    budget: usize::MAX,
                    max_rounds: 1,
                    block_size: instances.len().max(1),
                    first_test: usize::MAX,
                    ..self.config.racing.clone()
                };
                (sampler.suggest(samples), racing)
            }
            TuningStrategy::Racing => (
                sampler.suggest_distinct(self.config.racing.initial_candidates),
                self.config.racing.clone(),
            ),
        };

        info!(
            "Starting tuning run {} ({:?}) with {} candidates over {} instances",
            self.config.name,
            self.config.strategy,
            candidates.len(),
            instances.len()
        );
        self.status.mark_running(candidates.len());

        let status = &mut self.status;
        let result = Race::new(racing, candidates, instances.to_vec()).run(
            evaluator,
            &self.cancel,
            |summary| status.record_round(summary),
        );

        match result {
            Ok(outcome) => {
                self.status.mark_finished(&outcome);
                if let Some(best) = outcome.ranked.first() {
                    info!(
                        "Tuning run {} finished, best {} (rank sum {})",
                        self.config.name,
                        best.configuration.key(),
                        best.rank_sum
                    );
                }
                Ok(TuningOutcome {
                    status: self.status.clone(),
                    ranked: outcome.ranked,
                    rounds: outcome.rounds,
                    evaluations: outcome.evaluations,
                    stop: outcome.stop,
                    warnings: outcome.warnings,
                })
            }
            Err(e) => {
                self.status.mark_failed(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::{Observation, RoundOutcome};
    use hr_grammar::{testing, Configuration, FilterStrategy, GrammarBuilder, ParameterValue};
    use hr_types::ObjectiveDirection;
    use std::time::Duration;

    /// Scores a configuration by its constructive: A is best, C worst.
    struct ByConstructive {
        rounds: usize,
    }

    impl RoundEvaluator for ByConstructive {
        fn direction(&self) -> ObjectiveDirection {
            ObjectiveDirection::Minimize
        }

        fn evaluate(
            &mut self,
            _round: usize,
            candidates: &[&Configuration],
            instances: &[String],
        ) -> HrResult<RoundOutcome> {
            self.rounds += 1;
            let observations = candidates
                .iter()
                .map(|c| {
                    let score = match &c.root.params["constructive"] {
                        ParameterValue::Component(n) if n.component == "A" => 1.0,
                        ParameterValue::Component(n) if n.component == "B" => 2.0,
                        _ => 3.0,
                    };
                    vec![Observation::success(score, Duration::from_millis(1)); instances.len()]
                })
                .collect();
            Ok(RoundOutcome { observations })
        }
    }

    fn grammar() -> Grammar {
        let registry = testing::catalogue();
        let inventory = registry.inventory(&FilterStrategy::AdmitAll).unwrap();
        GrammarBuilder::new().build(&inventory).unwrap()
    }

    fn instances(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("instance-{i}")).collect()
    }

    #[test]
    fn racing_run_completes_and_prefers_best_constructive() {
        let grammar = grammar();
        let config = TunerConfig::new("race")
            .with_seed(9)
            .with_racing(RacingConfig::default().with_initial_candidates(8).with_first_test(3));
        let mut tuner = Tuner::new(config);
        let mut evaluator = ByConstructive { rounds: 0 };
        let outcome = tuner.run(&grammar, &mut evaluator, &instances(12)).unwrap();

        assert_eq!(outcome.status.state, TuningState::Completed);
        assert!(tuner.status().is_terminal());
        let best = outcome.best().unwrap();
        let best_constructive = match &best.configuration.root.params["constructive"] {
            ParameterValue::Component(n) => n.component.clone(),
            other => panic!("unexpected {other}"),
        };
        let sampled_best = outcome
            .ranked
            .iter()
            .all(|r| r.rank_sum >= best.rank_sum);
        assert!(sampled_best);
        assert_ne!(best_constructive, "C");
        assert_eq!(evaluator.rounds, outcome.rounds.len());
    }

    #[test]
    fn random_strategy_runs_one_round_on_every_instance() {
        let grammar = grammar();
        let config = TunerConfig::new("baseline").with_strategy(TuningStrategy::Random { samples: 5 });
        let mut tuner = Tuner::new(config);
        let mut evaluator = ByConstructive { rounds: 0 };
        let outcome = tuner.run(&grammar, &mut evaluator, &instances(4)).unwrap();

        assert_eq!(outcome.rounds.len(), 1);
        assert_eq!(outcome.ranked.len(), 5);
        assert_eq!(outcome.evaluations, 20);
        assert!(outcome.ranked.iter().all(|r| r.instances == 4));
    }

    #[test]
    fn same_seed_same_outcome() {
        let grammar = grammar();
        let run = || {
            let mut tuner = Tuner::new(TunerConfig::new("repeat").with_seed(21));
            let mut evaluator = ByConstructive { rounds: 0 };
            tuner.run(&grammar, &mut evaluator, &instances(8)).unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.ranked, b.ranked);
        assert_eq!(a.rounds, b.rounds);
    }

    #[test]
    fn cancelled_before_start_runs_no_round() {
        let grammar = grammar();
        let mut tuner = Tuner::new(TunerConfig::new("cancelled"));
        tuner.cancellation_token().cancel();
        let mut evaluator = ByConstructive { rounds: 0 };
        let outcome = tuner.run(&grammar, &mut evaluator, &instances(8)).unwrap();
        assert_eq!(outcome.stop, StopReason::Cancelled);
        assert_eq!(outcome.status.state, TuningState::Cancelled);
        assert_eq!(evaluator.rounds, 0);
    }

    #[test]
    fn config_loads_from_json() {
        let config = TunerConfig::from_json_str(
            r#"{
                "name": "from-json",
                "strategy": {"type": "random", "samples": 12},
                "sampler": {"seed": 4},
                "racing": {"block_size": 2, "significance": 0.1}
            }"#,
        )
        .unwrap();
        assert_eq!(config.strategy, TuningStrategy::Random { samples: 12 });
        assert_eq!(config.sampler.seed, 4);
        assert_eq!(config.racing.block_size, 2);
        assert_eq!(config.racing.initial_candidates, 16);

        assert!(TunerConfig::from_json_str(r#"{"racing": {"significance": 2.0}}"#).is_err());
        assert!(TunerConfig::from_json_str(r#"{"strategy": {"type": "random", "samples": 0}}"#).is_err());
    }

    #[test]
    fn invalid_config_marks_status_failed() {
        let grammar = grammar();
        let config = TunerConfig::new("bad").with_racing(RacingConfig::default().with_block_size(0));
        let mut tuner = Tuner::new(config);
        let mut evaluator = ByConstructive { rounds: 0 };
        assert!(tuner.run(&grammar, &mut evaluator, &instances(3)).is_err());
        assert_eq!(tuner.status().state, TuningState::Failed);
    }
}
