// Heurace execution engine
// Seeded work units on a bounded worker pool, folded into per-configuration summaries

pub mod aggregate;
pub mod evaluator;
pub mod experiment;
pub mod instances;
pub mod runner;
pub mod scheduler;
pub mod seed;
pub mod selection;
pub mod workunit;

#[cfg(test)]
mod fixtures;

pub use aggregate::{Aggregator, ConfigurationSummary};
pub use evaluator::SchedulerEvaluator;
pub use experiment::{Experiment, ExperimentReport, ExperimentRunner};
pub use instances::InstanceStore;
pub use runner::{ReferenceValues, SolutionValidator, UnitRunner};
pub use scheduler::{ResultStream, Scheduler, SchedulerConfig};
pub use seed::derive_seed;
pub use selection::{InstanceSelector, Selection, SelectionConfig};
pub use workunit::{FailureKind, UnitStatus, WorkUnit, WorkUnitResult};
