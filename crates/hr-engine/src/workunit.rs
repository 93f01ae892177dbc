//! Work units and their results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hr_grammar::Configuration;
use hr_types::{MetricSeries, TimeToTarget, OBJECTIVE_METRIC};

use crate::seed::derive_seed;

/// One execution of one configuration against one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub experiment: String,
    pub instance: String,
    pub configuration: Arc<Configuration>,
    pub repetition: usize,
    pub seed: u64,
}

impl WorkUnit {
    /// Build a unit whose seed is derived from `base_seed` and the unit's identity.
    pub fn new(
        experiment: impl Into<String>,
        instance: impl Into<String>,
        configuration: Arc<Configuration>,
        repetition: usize,
        base_seed: u64,
    ) -> Self {
        let experiment = experiment.into();
        let instance = instance.into();
        let seed = derive_seed(
            base_seed,
            &experiment,
            &configuration.key(),
            &instance,
            repetition,
        );
        Self {
            experiment,
            instance,
            configuration,
            repetition,
            seed,
        }
    }

    /// Name handed to the algorithm as its provided name.
    pub fn algorithm_name(&self) -> String {
        format!(
            "{}-{}",
            self.configuration.root.component, self.configuration.id
        )
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.experiment,
            self.algorithm_name(),
            self.instance,
            self.repetition
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Panicked,
    Errored,
    TimedOut,
    Infeasible,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Panicked => "panicked",
            Self::Errored => "errored",
            Self::TimedOut => "timed out",
            Self::Infeasible => "infeasible",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Completed,
    Failed { kind: FailureKind, message: String },
}

impl UnitStatus {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Completed => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Outcome of one work unit. Produced exactly once and never mutated.
#[derive(Debug, Clone)]
pub struct WorkUnitResult<S> {
    pub experiment: String,
    pub algorithm: String,
    pub configuration_id: usize,
    pub configuration_key: String,
    pub instance: String,
    pub repetition: usize,
    pub seed: u64,
    pub status: UnitStatus,
    pub solution: Option<S>,
    /// Objective value of `solution`; `None` unless the unit completed.
    pub score: Option<f64>,
    pub execution_time: Duration,
    pub time_to_target: TimeToTarget,
    pub metrics: BTreeMap<String, MetricSeries>,
}

impl<S> WorkUnitResult<S> {
    /// A result with no solution, used for every failure before evaluation.
    pub fn failure(unit: &WorkUnit, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            experiment: unit.experiment.clone(),
            algorithm: unit.algorithm_name(),
            configuration_id: unit.configuration.id,
            configuration_key: unit.configuration.key(),
            instance: unit.instance.clone(),
            repetition: unit.repetition,
            seed: unit.seed,
            status: UnitStatus::failed(kind, message),
            solution: None,
            score: None,
            execution_time: Duration::ZERO,
            time_to_target: TimeToTarget::Unreached,
            metrics: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    pub fn objective_series(&self) -> Option<&MetricSeries> {
        self.metrics.get(OBJECTIVE_METRIC)
    }

    /// Identity of the unit this result belongs to.
    pub fn unit_key(&self) -> (usize, &str, usize) {
        (self.configuration_id, self.instance.as_str(), self.repetition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_grammar::ConfiguredComponent;

    fn configuration() -> Arc<Configuration> {
        Arc::new(Configuration::new(
            3,
            ConfiguredComponent::parse("Multistart{constructive=A{}, improver=Noop{}, iterations=2, name=<provided:algorithm_name>}").unwrap(),
        ))
    }

    #[test]
    fn seed_follows_unit_identity() {
        let a = WorkUnit::new("exp", "i0", configuration(), 0, 9);
        let b = WorkUnit::new("exp", "i0", configuration(), 0, 9);
        let c = WorkUnit::new("exp", "i0", configuration(), 1, 9);
        assert_eq!(a.seed, b.seed);
        assert_ne!(a.seed, c.seed);
        assert_eq!(a.algorithm_name(), "Multistart-3");
        assert_eq!(a.to_string(), "exp/Multistart-3/i0#0");
    }

    #[test]
    fn failure_result_carries_identity() {
        let unit = WorkUnit::new("exp", "i1", configuration(), 2, 0);
        let result: WorkUnitResult<i64> =
            WorkUnitResult::failure(&unit, FailureKind::TimedOut, "too slow");
        assert!(!result.is_completed());
        assert_eq!(result.status.failure_kind(), Some(FailureKind::TimedOut));
        assert_eq!(result.unit_key(), (3, "i1", 2));
        assert_eq!(result.seed, unit.seed);
        assert!(result.score.is_none());
        assert_eq!(result.time_to_target, TimeToTarget::Unreached);
    }
}
