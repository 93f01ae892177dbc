//! Per-configuration summaries folded from unit results.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use hr_types::ObjectiveDirection;

use crate::workunit::WorkUnitResult;

/// Statistics over every result of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSummary {
    pub configuration_id: usize,
    pub configuration_key: String,
    pub runs: usize,
    pub failures: usize,
    /// Score statistics cover completed runs only.
    pub mean_score: Option<f64>,
    pub median_score: Option<f64>,
    pub best_score: Option<f64>,
    pub mean_execution_time: Duration,
    pub total_execution_time: Duration,
    /// Runs, failed ones included, that never reached their target.
    pub unreached_targets: usize,
    /// Mean over the runs that did reach their target.
    pub mean_time_to_target: Option<Duration>,
}

impl ConfigurationSummary {
    pub fn failure_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.runs as f64
        }
    }

    fn from_results<S>(results: &[&WorkUnitResult<S>], direction: ObjectiveDirection) -> Option<Self> {
        let first = results.first()?;
        let runs = results.len();

        let mut scores: Vec<f64> = results.iter().filter_map(|r| r.score).collect();
        scores.sort_by(|a, b| a.total_cmp(b));
        let mean_score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);
        let median_score = match scores.len() {
            0 => None,
            n if n % 2 == 1 => Some(scores[n / 2]),
            n => Some((scores[n / 2 - 1] + scores[n / 2]) / 2.0),
        };
        let best_score = direction.best_of(scores.iter().copied());

        let total_execution_time: Duration = results.iter().map(|r| r.execution_time).sum();
        let reached: Vec<Duration> = results
            .iter()
            .filter_map(|r| r.time_to_target.duration())
            .collect();
        let mean_time_to_target =
            (!reached.is_empty()).then(|| reached.iter().sum::<Duration>() / reached.len() as u32);

        Some(Self {
            configuration_id: first.configuration_id,
            configuration_key: first.configuration_key.clone(),
            runs,
            failures: results.iter().filter(|r| !r.is_completed()).count(),
            mean_score,
            median_score,
            best_score,
            mean_execution_time: total_execution_time / runs as u32,
            total_execution_time,
            unreached_targets: runs - reached.len(),
            mean_time_to_target,
        })
    }
}

/// The single merge point for finished units.
///
/// Workers never touch it while running; results are folded one at a time
/// after their unit completes.
pub struct Aggregator<S> {
    direction: ObjectiveDirection,
    results: Mutex<Vec<WorkUnitResult<S>>>,
}

impl<S: Clone> Aggregator<S> {
    pub fn new(direction: ObjectiveDirection) -> Self {
        Self {
            direction,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn fold(&self, result: WorkUnitResult<S>) {
        self.results.lock().push(result);
    }

    pub fn fold_all(&self, results: impl IntoIterator<Item = WorkUnitResult<S>>) {
        self.results.lock().extend(results);
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    pub fn summary(&self, configuration_id: usize) -> Option<ConfigurationSummary> {
        let results = self.results.lock();
        let matching: Vec<&WorkUnitResult<S>> = results
            .iter()
            .filter(|r| r.configuration_id == configuration_id)
            .collect();
        ConfigurationSummary::from_results(&matching, self.direction)
    }

    /// Summaries of every configuration seen so far, by configuration id.
    pub fn summaries(&self) -> Vec<ConfigurationSummary> {
        let results = self.results.lock();
        let mut grouped: BTreeMap<usize, Vec<&WorkUnitResult<S>>> = BTreeMap::new();
        for result in results.iter() {
            grouped.entry(result.configuration_id).or_default().push(result);
        }
        grouped
            .values()
            .filter_map(|group| ConfigurationSummary::from_results(group, self.direction))
            .collect()
    }

    /// All folded results in fold order.
    pub fn results(&self) -> Vec<WorkUnitResult<S>> {
        self.results.lock().clone()
    }

    /// Best completed result of each instance; the earliest folded wins ties.
    pub fn best_per_instance(&self) -> BTreeMap<String, WorkUnitResult<S>> {
        let results = self.results.lock();
        let mut best: BTreeMap<String, &WorkUnitResult<S>> = BTreeMap::new();
        for result in results.iter() {
            let Some(score) = result.score else { continue };
            match best.get(&result.instance).and_then(|current| current.score) {
                Some(current) if !self.direction.is_better(score, current) => {}
                _ => {
                    best.insert(result.instance.clone(), result);
                }
            }
        }
        best.into_iter()
            .map(|(instance, result)| (instance, result.clone()))
            .collect()
    }

    pub fn failed(&self) -> Vec<WorkUnitResult<S>> {
        self.results
            .lock()
            .iter()
            .filter(|r| !r.is_completed())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::workunit::{FailureKind, UnitStatus, WorkUnit};
    use hr_types::TimeToTarget;
    use std::sync::Arc;

    fn result(
        configuration: usize,
        instance: &str,
        score: Option<f64>,
        millis: u64,
        ttt: Option<u64>,
    ) -> WorkUnitResult<i64> {
        let unit = WorkUnit::new(
            "exp",
            instance,
            fixtures::multistart(configuration, "A"),
            0,
            0,
        );
        let mut result = WorkUnitResult::failure(&unit, FailureKind::Errored, "failed");
        if let Some(score) = score {
            result.status = UnitStatus::Completed;
            result.score = Some(score);
            result.solution = Some(score as i64);
        }
        result.execution_time = Duration::from_millis(millis);
        result.time_to_target = match ttt {
            Some(ms) => TimeToTarget::Reached(Duration::from_millis(ms)),
            None => TimeToTarget::Unreached,
        };
        result
    }

    #[test]
    fn summary_statistics() {
        let aggregator = Aggregator::new(ObjectiveDirection::Minimize);
        aggregator.fold(result(0, "i0", Some(4.0), 10, Some(2)));
        aggregator.fold(result(0, "i1", Some(1.0), 20, Some(6)));
        aggregator.fold(result(0, "i2", Some(10.0), 30, None));
        aggregator.fold(result(0, "i2", None, 40, None));
        aggregator.fold(result(1, "i0", Some(3.0), 5, None));

        let summary = aggregator.summary(0).unwrap();
        assert_eq!(summary.runs, 4);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.mean_score, Some(5.0));
        assert_eq!(summary.median_score, Some(4.0));
        assert_eq!(summary.best_score, Some(1.0));
        assert_eq!(summary.total_execution_time, Duration::from_millis(100));
        assert_eq!(summary.mean_execution_time, Duration::from_millis(25));
        assert_eq!(summary.unreached_targets, 2);
        assert_eq!(summary.mean_time_to_target, Some(Duration::from_millis(4)));
        assert_eq!(summary.failure_rate(), 0.25);
    }

    #[test]
    fn even_count_median_averages_the_middle() {
        let aggregator = Aggregator::new(ObjectiveDirection::Maximize);
        for score in [1.0, 7.0, 3.0, 5.0] {
            aggregator.fold(result(2, "i0", Some(score), 1, None));
        }
        let summary = aggregator.summary(2).unwrap();
        assert_eq!(summary.median_score, Some(4.0));
        assert_eq!(summary.best_score, Some(7.0));
        assert_eq!(summary.mean_time_to_target, None);
    }

    #[test]
    fn all_failed_configuration_has_no_scores() {
        let aggregator = Aggregator::new(ObjectiveDirection::Minimize);
        aggregator.fold(result(3, "i0", None, 1, None));
        let summary = aggregator.summary(3).unwrap();
        assert_eq!(summary.mean_score, None);
        assert_eq!(summary.median_score, None);
        assert_eq!(summary.best_score, None);
        assert!(aggregator.summary(4).is_none());
    }

    #[test]
    fn summaries_best_and_failed() {
        let aggregator = Aggregator::new(ObjectiveDirection::Minimize);
        aggregator.fold_all([
            result(1, "i0", Some(3.0), 1, None),
            result(0, "i0", Some(3.0), 1, None),
            result(0, "i1", Some(2.0), 1, None),
            result(1, "i1", None, 1, None),
        ]);
        let ids: Vec<usize> = aggregator.summaries().iter().map(|s| s.configuration_id).collect();
        assert_eq!(ids, vec![0, 1]);

        let best = aggregator.best_per_instance();
        assert_eq!(best["i0"].configuration_id, 1);
        assert_eq!(best["i1"].configuration_id, 0);
        assert_eq!(aggregator.failed().len(), 1);
        assert_eq!(aggregator.len(), 4);
    }

    #[test]
    fn concurrent_folds_are_all_kept() {
        let aggregator = Arc::new(Aggregator::new(ObjectiveDirection::Minimize));
        std::thread::scope(|scope| {
            for t in 0..4 {
                let aggregator = Arc::clone(&aggregator);
                scope.spawn(move || {
                    for i in 0..25 {
                        aggregator.fold(result(t, "i0", Some(i as f64), 1, None));
                    }
                });
            }
        });
        assert_eq!(aggregator.len(), 100);
        assert_eq!(aggregator.summaries().len(), 4);
    }
}
