//! Racing rounds executed through the scheduler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hr_grammar::Configuration;
use hr_optimizer::{Observation, RoundEvaluator, RoundOutcome};
use hr_types::{internal_error, HrResult, ObjectiveDirection, Problem};
use tracing::debug;

use crate::aggregate::Aggregator;
use crate::scheduler::Scheduler;
use crate::workunit::WorkUnit;

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    sum: f64,
    completed: usize,
    time: Duration,
}

impl Cell {
    /// Mean over completed repetitions; a cell with none is a failure.
    fn observation(&self) -> Observation {
        if self.completed == 0 {
            Observation::failure(self.time)
        } else {
            Observation::success(self.sum / self.completed as f64, self.time)
        }
    }
}

/// Evaluates each round as one scheduler batch and waits for all of it.
///
/// Every unit result is also folded into a shared [`Aggregator`].
pub struct SchedulerEvaluator<'s, P: Problem> {
    scheduler: &'s Scheduler<P>,
    aggregator: Arc<Aggregator<P::Solution>>,
    experiment: String,
    repetitions: usize,
    base_seed: u64,
}

impl<'s, P: Problem> SchedulerEvaluator<'s, P> {
    pub fn new(scheduler: &'s Scheduler<P>, experiment: impl Into<String>) -> Self {
        Self {
            aggregator: Arc::new(Aggregator::new(scheduler.direction())),
            scheduler,
            experiment: experiment.into(),
            repetitions: 1,
            base_seed: 0,
        }
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn aggregator(&self) -> &Arc<Aggregator<P::Solution>> {
        &self.aggregator
    }
}

impl<P: Problem> RoundEvaluator for SchedulerEvaluator<'_, P> {
    fn direction(&self) -> ObjectiveDirection {
        self.scheduler.direction()
    }

    fn evaluate(
        &mut self,
        round: usize,
        candidates: &[&Configuration],
        instances: &[String],
    ) -> HrResult<RoundOutcome> {
        let mut units = Vec::with_capacity(candidates.len() * instances.len() * self.repetitions);
        for candidate in candidates {
            let configuration = Arc::new((*candidate).clone());
            for instance in instances {
                for repetition in 0..self.repetitions {
                    units.push(WorkUnit::new(
                        self.experiment.clone(),
                        instance.clone(),
                        Arc::clone(&configuration),
                        repetition,
                        self.base_seed,
                    ));
                }
            }
        }
        debug!(
            "Round {}: {} candidates on {} instances, {} units",
            round,
            candidates.len(),
            instances.len(),
            units.len()
        );

        let results = self.scheduler.run_all(units)?;

        let by_id: HashMap<usize, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
        let by_instance: HashMap<&str, usize> = instances
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut cells = vec![vec![Cell::default(); instances.len()]; candidates.len()];
        for result in &results {
            let (Some(&c), Some(&i)) = (
                by_id.get(&result.configuration_id),
                by_instance.get(result.instance.as_str()),
            ) else {
                return Err(internal_error!(
                    "round {} returned a result for unknown unit {:?}",
                    round,
                    result.unit_key()
                ));
            };
            let cell = &mut cells[c][i];
            cell.time += result.execution_time;
            if let Some(score) = result.score {
                cell.sum += score;
                cell.completed += 1;
            }
        }

        self.aggregator.fold_all(results);
        Ok(RoundOutcome {
            observations: cells
                .iter()
                .map(|row| row.iter().map(Cell::observation).collect())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::runner::UnitRunner;
    use crate::scheduler::SchedulerConfig;
    use hr_grammar::testing::{catalogue, Toy};
    use hr_grammar::{FilterStrategy, GrammarBuilder};
    use hr_optimizer::{CancellationToken, Race, RacingConfig, StopReason, Tuner, TunerConfig};
    use hr_types::ClockMode;

    fn scheduler() -> Scheduler<Toy> {
        let runner = UnitRunner::new(fixtures::registry(), fixtures::objective())
            .with_clock(ClockMode::Logical);
        Scheduler::new(SchedulerConfig::default().with_workers(2), runner, fixtures::store()).unwrap()
    }

    #[test]
    fn observations_follow_candidate_and_instance_order() {
        let scheduler = scheduler();
        let mut evaluator = SchedulerEvaluator::new(&scheduler, "round").with_repetitions(2);
        let c = Configuration::clone(&fixtures::multistart(4, "C"));
        let boom = Configuration::clone(&fixtures::configuration(7, "Boom{}"));
        let a = Configuration::clone(&fixtures::multistart(2, "A"));
        let instances = vec!["i2".to_string(), "i0".to_string()];

        let outcome = evaluator.evaluate(1, &[&c, &boom, &a], &instances).unwrap();
        let scores: Vec<Vec<Option<f64>>> = outcome
            .observations
            .iter()
            .map(|row| row.iter().map(|o| o.score).collect())
            .collect();
        assert_eq!(
            scores,
            vec![
                vec![Some(8.0), Some(3.0)],
                vec![None, None],
                vec![Some(6.0), Some(1.0)],
            ]
        );
        assert_eq!(evaluator.aggregator().len(), 12);
        assert_eq!(evaluator.aggregator().summary(7).unwrap().failures, 4);
    }

    #[test]
    fn race_through_the_scheduler() {
        let scheduler = scheduler();
        let mut evaluator = SchedulerEvaluator::new(&scheduler, "race")
            .with_repetitions(2)
            .with_seed(3);
        let candidates = vec![
            Configuration::clone(&fixtures::multistart(0, "A")),
            Configuration::clone(&fixtures::multistart(1, "C")),
        ];
        let race = Race::new(
            RacingConfig::default()
                .with_initial_candidates(2)
                .with_first_test(2),
            candidates,
            fixtures::instance_ids(),
        );

        let outcome = race
            .run(&mut evaluator, &CancellationToken::new(), |_| {})
            .unwrap();
        assert_eq!(outcome.stop, StopReason::InstancesExhausted);
        assert_eq!(outcome.evaluations, 6);
        assert_eq!(outcome.ranked[0].configuration.id, 0);
        assert_eq!(evaluator.aggregator().len(), 12);
    }

    #[test]
    fn tuner_runs_on_the_scheduler() {
        let registry = catalogue();
        let inventory = registry.inventory(&FilterStrategy::blacklist(["Ils"])).unwrap();
        let grammar = GrammarBuilder::new().build(&inventory).unwrap();

        let scheduler = scheduler();
        let mut evaluator = SchedulerEvaluator::new(&scheduler, "tuning");
        let mut tuner = Tuner::new(
            TunerConfig::new("tuning").with_seed(12).with_racing(
                RacingConfig::default()
                    .with_initial_candidates(6)
                    .with_first_test(2),
            ),
        );
        let outcome = tuner
            .run(&grammar, &mut evaluator, &fixtures::instance_ids())
            .unwrap();

        assert!(!outcome.ranked.is_empty());
        assert_eq!(evaluator.aggregator().len(), outcome.evaluations);
        let best = outcome.best().unwrap().mean_score.unwrap();
        assert!(outcome
            .ranked
            .iter()
            .all(|r| r.mean_score.map_or(true, |score| best <= score)));
    }
}
