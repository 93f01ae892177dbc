//! Experiments: the Cartesian product of configurations, instances and repetitions.

use std::collections::BTreeMap;
use std::sync::Arc;

use hr_grammar::Configuration;
use hr_types::{validation_error, ExecutionError, HrResult, ObjectiveDirection, Problem};
use tracing::info;

use crate::aggregate::{Aggregator, ConfigurationSummary};
use crate::scheduler::Scheduler;
use crate::workunit::{WorkUnit, WorkUnitResult};

#[derive(Debug, Clone)]
pub struct Experiment {
    pub name: String,
    pub configurations: Vec<Arc<Configuration>>,
    pub instances: Vec<String>,
    pub repetitions: usize,
    pub base_seed: u64,
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configurations: Vec::new(),
            instances: Vec::new(),
            repetitions: 1,
            base_seed: 0,
        }
    }

    pub fn with_configurations(mut self, configurations: impl IntoIterator<Item = Configuration>) -> Self {
        self.configurations = configurations.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_instances<I, S>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instances = instances.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    pub fn validate(&self) -> HrResult<()> {
        if self.configurations.is_empty() {
            return Err(validation_error!("experiment {} has no configurations", self.name));
        }
        if self.instances.is_empty() {
            return Err(validation_error!("experiment {} has no instances", self.name));
        }
        if self.repetitions == 0 {
            return Err(validation_error!("experiment {} has zero repetitions", self.name));
        }
        Ok(())
    }

    pub fn unit_count(&self) -> usize {
        self.configurations.len() * self.instances.len() * self.repetitions
    }

    /// Lazily generated units, ordered by configuration, then instance, then
    /// repetition.
    pub fn units(&self) -> impl Iterator<Item = WorkUnit> + Send + 'static {
        let name = self.name.clone();
        let instances = self.instances.clone();
        let repetitions = self.repetitions;
        let seed = self.base_seed;
        self.configurations
            .clone()
            .into_iter()
            .flat_map(move |configuration| {
                let name = name.clone();
                instances.clone().into_iter().flat_map(move |instance| {
                    let name = name.clone();
                    let configuration = Arc::clone(&configuration);
                    (0..repetitions).map(move |repetition| {
                        WorkUnit::new(
                            name.clone(),
                            instance.clone(),
                            Arc::clone(&configuration),
                            repetition,
                            seed,
                        )
                    })
                })
            })
    }

    pub fn work_units(&self) -> Vec<WorkUnit> {
        self.units().collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentReport<S> {
    pub experiment: String,
    pub results: Vec<WorkUnitResult<S>>,
    pub summaries: Vec<ConfigurationSummary>,
    pub best_per_instance: BTreeMap<String, WorkUnitResult<S>>,
    pub failed: Vec<WorkUnitResult<S>>,
}

impl<S> ExperimentReport<S> {
    /// Summary with the best mean score; the lowest id wins ties.
    pub fn best_summary(&self, direction: ObjectiveDirection) -> Option<&ConfigurationSummary> {
        let mut best: Option<(&ConfigurationSummary, f64)> = None;
        for summary in &self.summaries {
            let Some(score) = summary.mean_score else { continue };
            match best {
                Some((_, current)) if !direction.is_better(score, current) => {}
                _ => best = Some((summary, score)),
            }
        }
        best.map(|(summary, _)| summary)
    }
}

pub struct ExperimentRunner<'s, P: Problem> {
    scheduler: &'s Scheduler<P>,
}

impl<'s, P: Problem> ExperimentRunner<'s, P> {
    pub fn new(scheduler: &'s Scheduler<P>) -> Self {
        Self { scheduler }
    }

    pub fn run(&self, experiment: &Experiment) -> HrResult<ExperimentReport<P::Solution>> {
        experiment.validate()?;
        let expected = experiment.unit_count();
        info!(
            "Experiment {}: {} configurations x {} instances x {} repetitions = {} units",
            experiment.name,
            experiment.configurations.len(),
            experiment.instances.len(),
            experiment.repetitions,
            expected
        );

        let aggregator = Aggregator::new(self.scheduler.direction());
        for result in self.scheduler.submit(experiment.units())? {
            aggregator.fold(result);
        }
        if aggregator.len() != expected {
            return Err(ExecutionError::MissingResults {
                expected,
                received: aggregator.len(),
            }
            .into());
        }

        let mut results = aggregator.results();
        results.sort_by(|a, b| a.unit_key().cmp(&b.unit_key()));
        let report = ExperimentReport {
            experiment: experiment.name.clone(),
            summaries: aggregator.summaries(),
            best_per_instance: aggregator.best_per_instance(),
            failed: results.iter().filter(|r| !r.is_completed()).cloned().collect(),
            results,
        };
        info!(
            "Experiment {} finished: {} results, {} failed",
            report.experiment,
            report.results.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::runner::UnitRunner;
    use crate::scheduler::SchedulerConfig;
    use hr_grammar::testing::Toy;
    use hr_types::{ClockMode, HrError};

    fn scheduler() -> Scheduler<Toy> {
        let runner = UnitRunner::new(fixtures::registry(), fixtures::objective())
            .with_clock(ClockMode::Logical);
        Scheduler::new(SchedulerConfig::default().with_workers(3), runner, fixtures::store()).unwrap()
    }

    fn experiment() -> Experiment {
        Experiment::new("toy")
            .with_configurations([
                Configuration::clone(&fixtures::multistart(0, "C")),
                Configuration::clone(&fixtures::multistart(1, "A")),
                Configuration::clone(&fixtures::configuration(2, "Boom{}")),
            ])
            .with_instances(fixtures::instance_ids())
            .with_repetitions(2)
            .with_seed(5)
    }

    #[test]
    fn work_units_are_the_ordered_product() {
        let units = experiment().work_units();
        assert_eq!(units.len(), 18);
        let first: Vec<(usize, &str, usize)> = units[..3]
            .iter()
            .map(|u| (u.configuration.id, u.instance.as_str(), u.repetition))
            .collect();
        assert_eq!(first, vec![(0, "i0", 0), (0, "i0", 1), (0, "i1", 0)]);
        assert_eq!(units[17].configuration.id, 2);
        assert_eq!(experiment().unit_count(), 18);

        let lazy: Vec<u64> = experiment().units().take(3).map(|u| u.seed).collect();
        let eager: Vec<u64> = units[..3].iter().map(|u| u.seed).collect();
        assert_eq!(lazy, eager);
    }

    #[test]
    fn report_collects_everything() {
        let report = ExperimentRunner::new(&scheduler()).run(&experiment()).unwrap();
        assert_eq!(report.results.len(), 18);
        assert_eq!(report.failed.len(), 6);
        assert_eq!(report.summaries.len(), 3);

        // A always beats C; offsets are 0, 1 and 5.
        assert_eq!(report.best_per_instance["i2"].configuration_id, 1);
        assert_eq!(report.best_per_instance["i2"].score, Some(6.0));
        let best = report.best_summary(ObjectiveDirection::Minimize).unwrap();
        assert_eq!(best.configuration_id, 1);
        let worst = report.best_summary(ObjectiveDirection::Maximize).unwrap();
        assert_eq!(worst.configuration_id, 0);

        let boom = &report.summaries[2];
        assert_eq!(boom.failures, 6);
        assert_eq!(boom.mean_score, None);
    }

    #[test]
    fn empty_experiment_is_rejected() {
        let err = ExperimentRunner::new(&scheduler())
            .run(&Experiment::new("empty"))
            .unwrap_err();
        assert!(matches!(err, HrError::Validation(_)));
    }
}
