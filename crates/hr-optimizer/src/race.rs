//! Iterated racing: evaluate surviving candidates on shared instance blocks
//! and drop the ones a Friedman test shows to be worse than the leader.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use hr_grammar::Configuration;
use hr_types::{internal_error, CancellationToken, HrResult, ObjectiveDirection};
use tracing::{debug, info, warn};

use crate::stats::FriedmanTest;

/// Score and time of one candidate on one instance. `score` is `None` when
/// the run failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub score: Option<f64>,
    pub execution_time: Duration,
}

impl Observation {
    pub fn success(score: f64, execution_time: Duration) -> Self {
        Self {
            score: Some(score),
            execution_time,
        }
    }

    pub fn failure(execution_time: Duration) -> Self {
        Self {
            score: None,
            execution_time,
        }
    }
}

/// Observations of one round, indexed `[candidate][instance]` in the order
/// the candidates and instances were handed to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub observations: Vec<Vec<Observation>>,
}

/// Runs every candidate of a round on every instance of its block and returns
/// only once all of them finished.
pub trait RoundEvaluator {
    fn direction(&self) -> ObjectiveDirection;

    fn evaluate(
        &mut self,
        round: usize,
        candidates: &[&Configuration],
        instances: &[String],
    ) -> HrResult<RoundOutcome>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RacingConfig {
    /// Candidates sampled before the first round.
    pub initial_candidates: usize,
    /// Maximum number of (candidate, instance) evaluations.
    pub budget: usize,
    pub max_rounds: usize,
    /// New instances per round.
    pub block_size: usize,
    /// Instances accumulated before the first elimination test.
    pub first_test: usize,
    pub significance: f64,
    pub min_survivors: usize,
    /// Round failure rate above which a warning is raised.
    pub failure_warning_rate: f64,
}

impl Default for RacingConfig {
    fn default() -> Self {
        Self {
            initial_candidates: 16,
            budget: 1000,
            max_rounds: 50,
            block_size: 1,
            first_test: 5,
            significance: 0.05,
            min_survivors: 1,
            failure_warning_rate: 0.25,
        }
    }
}

impl RacingConfig {
    pub fn with_initial_candidates(mut self, n: usize) -> Self {
        self.initial_candidates = n;
        self
    }

    pub fn with_budget(mut self, evaluations: usize) -> Self {
        self.budget = evaluations;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_block_size(mut self, instances: usize) -> Self {
        self.block_size = instances;
        self
    }

    pub fn with_first_test(mut self, instances: usize) -> Self {
        self.first_test = instances;
        self
    }

    pub fn with_significance(mut self, alpha: f64) -> Self {
        self.significance = alpha;
        self
    }

    pub fn with_min_survivors(mut self, n: usize) -> Self {
        self.min_survivors = n;
        self
    }

    pub fn with_failure_warning_rate(mut self, rate: f64) -> Self {
        self.failure_warning_rate = rate;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.block_size == 0 {
            return Err("block_size must be at least 1".to_string());
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(format!("significance must be in (0, 1), got {}", self.significance));
        }
        if !(0.0..=1.0).contains(&self.failure_warning_rate) {
            return Err(format!(
                "failure_warning_rate must be in [0, 1], got {}",
                self.failure_warning_rate
            ));
        }
        Ok(())
    }
}

/// Why a race stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    SingleSurvivor,
    MaxRounds,
    BudgetExhausted,
    InstancesExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    pub instances: Vec<String>,
    pub candidates: usize,
    /// Configuration ids eliminated after this round.
    pub eliminated: Vec<usize>,
    pub survivors: usize,
    pub failure_rate: f64,
    pub statistic: Option<f64>,
    pub critical: Option<f64>,
}

/// A surviving candidate with the numbers used to rank it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub configuration: Configuration,
    /// Rank sum among the survivors over every instance raced.
    pub rank_sum: f64,
    pub mean_score: Option<f64>,
    pub failures: usize,
    pub total_time: Duration,
    pub instances: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceOutcome {
    /// Survivors, best first.
    pub ranked: Vec<RankedCandidate>,
    pub rounds: Vec<RoundSummary>,
    pub evaluations: usize,
    pub stop: StopReason,
    pub warnings: Vec<String>,
}

/// State of one race over a fixed candidate pool.
pub struct Race {
    config: RacingConfig,
    candidates: Vec<Configuration>,
    alive: Vec<bool>,
    /// `[candidate][instance position]`, only for instances raced while alive.
    observations: Vec<Vec<Observation>>,
    instances: Vec<String>,
    used: usize,
    evaluations: usize,
    rounds: Vec<RoundSummary>,
    warnings: Vec<String>,
}

impl Race {
    pub fn new(config: RacingConfig, candidates: Vec<Configuration>, instances: Vec<String>) -> Self {
        let n = candidates.len();
        Self {
            config,
            candidates,
            alive: vec![true; n],
            observations: vec![Vec::new(); n],
            instances,
            used: 0,
            evaluations: 0,
            rounds: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn survivors(&self) -> usize {
        self.alive.iter().filter(|a| **a).count()
    }

    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    fn alive_indices(&self) -> Vec<usize> {
        (0..self.candidates.len()).filter(|&i| self.alive[i]).collect()
    }

    fn stop_reason(&self, alive: usize, cancel: &CancellationToken) -> Option<StopReason> {
        // A lone initial candidate is still evaluated once.
        if alive == 0 || (alive == 1 && !self.rounds.is_empty()) {
            return Some(StopReason::SingleSurvivor);
        }
        if self.rounds.len() >= self.config.max_rounds {
            return Some(StopReason::MaxRounds);
        }
        if self.used >= self.instances.len() {
            return Some(StopReason::InstancesExhausted);
        }
        let block = self.config.block_size.min(self.instances.len() - self.used);
        if self.evaluations + alive * block > self.config.budget {
            return Some(StopReason::BudgetExhausted);
        }
        if cancel.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        None
    }

    /// Race until a stop condition holds, calling `on_round` after every round.
    pub fn run<E, F>(
        mut self,
        evaluator: &mut E,
        cancel: &CancellationToken,
        mut on_round: F,
    ) -> HrResult<RaceOutcome>
    where
        E: RoundEvaluator + ?Sized,
        F: FnMut(&RoundSummary),
    {
        self.config
            .validate()
            .map_err(|message| hr_types::config_error!("{message}"))?;
        let direction = evaluator.direction();

        let stop = loop {
            let alive = self.alive_indices();
            if let Some(reason) = self.stop_reason(alive.len(), cancel) {
                break reason;
            }

            let round = self.rounds.len() + 1;
            let end = (self.used + self.config.block_size).min(self.instances.len());
            let block: Vec<String> = self.instances[self.used..end].to_vec();
            info!(
                "Racing round {} with {} candidates on {} instances",
                round,
                alive.len(),
                block.len()
            );

            let configurations: Vec<&Configuration> =
                alive.iter().map(|&i| &self.candidates[i]).collect();
            let outcome = evaluator.evaluate(round, &configurations, &block)?;
            self.record(&alive, &block, outcome)?;

            let summary = self.eliminate(round, &alive, block, direction);
            on_round(&summary);
            self.rounds.push(summary);
        };

        info!(
            "Race finished after {} rounds ({:?}) with {} survivors",
            self.rounds.len(),
            stop,
            self.survivors()
        );
        let ranked = self.rank(direction);
        Ok(RaceOutcome {
            ranked,
            rounds: self.rounds,
            evaluations: self.evaluations,
            stop,
            warnings: self.warnings,
        })
    }

    fn record(&mut self, alive: &[usize], block: &[String], outcome: RoundOutcome) -> HrResult<()> {
        if outcome.observations.len() != alive.len()
            || outcome.observations.iter().any(|row| row.len() != block.len())
        {
            return Err(internal_error!(
                "round outcome has the wrong shape: expected {} x {}",
                alive.len(),
                block.len()
            ));
        }
        for (&candidate, row) in alive.iter().zip(outcome.observations) {
            self.observations[candidate].extend(row);
        }
        self.used += block.len();
        self.evaluations += alive.len() * block.len();
        Ok(())
    }

    fn eliminate(
        &mut self,
        round: usize,
        alive: &[usize],
        block: Vec<String>,
        direction: ObjectiveDirection,
    ) -> RoundSummary {
        let start = self.used - block.len();
        let failures = alive
            .iter()
            .flat_map(|&c| &self.observations[c][start..])
            .filter(|o| o.score.is_none())
            .count();
        let failure_rate = failures as f64 / (alive.len() * block.len()).max(1) as f64;
        if failure_rate > self.config.failure_warning_rate {
            let message = format!(
                "round {round}: {failures} of {} evaluations failed ({:.0}%)",
                alive.len() * block.len(),
                failure_rate * 100.0
            );
            warn!("{}", message);
            self.warnings.push(message);
        }

        let mut summary = RoundSummary {
            round,
            instances: block,
            candidates: alive.len(),
            eliminated: Vec::new(),
            survivors: alive.len(),
            failure_rate,
            statistic: None,
            critical: None,
        };
        if self.used < self.config.first_test {
            return summary;
        }

        let blocks = self.blocks(alive);
        let Some(test) = FriedmanTest::new(self.config.significance).run(&blocks, direction) else {
            return summary;
        };
        summary.statistic = Some(test.statistic);
        summary.critical = Some(test.critical);

        let mut remaining = alive.len();
        for column in test.eliminated {
            if remaining <= self.config.min_survivors.max(1) {
                break;
            }
            let candidate = alive[column];
            self.alive[candidate] = false;
            remaining -= 1;
            summary.eliminated.push(self.candidates[candidate].id);
            debug!(
                "Eliminated {} with rank sum {} against leader {}",
                self.candidates[candidate].key(),
                test.rank_sums[column],
                test.rank_sums[test.leader]
            );
        }
        if !summary.eliminated.is_empty() {
            info!(
                "Round {} eliminated {} candidates (statistic {:.3} > {:.3})",
                round,
                summary.eliminated.len(),
                test.statistic,
                test.critical
            );
        }
        summary.survivors = remaining;
        summary
    }

    /// Scores of `columns` as `[instance][column]` blocks.
    fn blocks(&self, columns: &[usize]) -> Vec<Vec<Option<f64>>> {
        (0..self.used)
            .map(|i| {
                columns
                    .iter()
                    .map(|&c| self.observations[c][i].score)
                    .collect()
            })
            .collect()
    }

    fn rank(&self, direction: ObjectiveDirection) -> Vec<RankedCandidate> {
        let alive = self.alive_indices();
        let rank_sums = FriedmanTest::rank_sums(&self.blocks(&alive), direction);

        let mut ranked: Vec<(usize, RankedCandidate)> = alive
            .iter()
            .enumerate()
            .map(|(column, &c)| {
                let observations = &self.observations[c];
                let scores: Vec<f64> = observations.iter().filter_map(|o| o.score).collect();
                let mean_score = if scores.is_empty() {
                    None
                } else {
                    Some(scores.iter().sum::<f64>() / scores.len() as f64)
                };
                (
                    c,
                    RankedCandidate {
                        configuration: self.candidates[c].clone(),
                        rank_sum: rank_sums.get(column).copied().unwrap_or(0.0),
                        mean_score,
                        failures: observations.len() - scores.len(),
                        total_time: observations.iter().map(|o| o.execution_time).sum(),
                        instances: observations.len(),
                    },
                )
            })
            .collect();

        ranked.sort_by(|(ia, a), (ib, b)| {
            a.rank_sum
                .partial_cmp(&b.rank_sum)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.total_time.cmp(&b.total_time))
                .then(ia.cmp(ib))
        });
        ranked.into_iter().map(|(_, r)| r).collect()
    }
}
