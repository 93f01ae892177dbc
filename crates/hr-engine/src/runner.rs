//! Execution of a single work unit.

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hr_grammar::{ComponentRegistry, ProvidedContext};
use hr_types::{
    Algorithm, CancellationToken, ClockMode, HrResult, Objective, Problem, RunContext,
    TimeToTarget, OBJECTIVE_METRIC,
};
use tracing::{debug, warn};

use crate::workunit::{FailureKind, UnitStatus, WorkUnit, WorkUnitResult};

/// Feasibility check run on every solution before it counts.
pub trait SolutionValidator<P: Problem>: Send + Sync {
    fn validate(&self, instance: &P::Instance, solution: &P::Solution) -> Result<(), String>;
}

impl<P, F> SolutionValidator<P> for F
where
    P: Problem,
    F: Fn(&P::Instance, &P::Solution) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, instance: &P::Instance, solution: &P::Solution) -> Result<(), String> {
        self(instance, solution)
    }
}

/// Per-instance targets for time-to-target and known optimal values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceValues {
    targets: BTreeMap<String, f64>,
    optima: BTreeMap<String, f64>,
}

impl ReferenceValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, instance: impl Into<String>, target: f64) -> Self {
        self.targets.insert(instance.into(), target);
        self
    }

    /// A solution strictly better than a known optimum is rejected as infeasible.
    pub fn with_optimum(mut self, instance: impl Into<String>, optimum: f64) -> Self {
        self.optima.insert(instance.into(), optimum);
        self
    }

    pub fn target(&self, instance: &str) -> Option<f64> {
        self.targets.get(instance).copied()
    }

    pub fn optimum(&self, instance: &str) -> Option<f64> {
        self.optima.get(instance).copied()
    }
}

type Execution<S> = (HrResult<S>, RunContext);

/// Turns a [`WorkUnit`] into exactly one [`WorkUnitResult`].
///
/// Panics, errors, timeouts and infeasible solutions all become failed
/// results; nothing escapes to the caller.
pub struct UnitRunner<P: Problem> {
    registry: Arc<ComponentRegistry<P>>,
    objective: Objective<P::Solution, P::Move>,
    references: ReferenceValues,
    validator: Option<Arc<dyn SolutionValidator<P>>>,
    timeout: Option<Duration>,
    clock: ClockMode,
}

impl<P: Problem> UnitRunner<P> {
    pub fn new(registry: Arc<ComponentRegistry<P>>, objective: Objective<P::Solution, P::Move>) -> Self {
        Self {
            registry,
            objective,
            references: ReferenceValues::default(),
            validator: None,
            timeout: None,
            clock: ClockMode::default(),
        }
    }

    pub fn with_references(mut self, references: ReferenceValues) -> Self {
        self.references = references;
        self
    }

    pub fn with_validator(mut self, validator: impl SolutionValidator<P> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: ClockMode) -> Self {
        self.clock = clock;
        self
    }

    pub fn objective(&self) -> &Objective<P::Solution, P::Move> {
        &self.objective
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn run(&self, unit: &WorkUnit, instance: Arc<P::Instance>) -> WorkUnitResult<P::Solution> {
        let direction = self.objective.direction();
        let context = ProvidedContext::new(unit.algorithm_name(), direction);
        let instantiated = panic::catch_unwind(AssertUnwindSafe(|| {
            unit.configuration.instantiate(&self.registry, &context)
        }));
        let algorithm = match instantiated {
            Ok(Ok(algorithm)) => algorithm,
            Ok(Err(e)) => return self.failed(unit, FailureKind::Errored, e.to_string(), Duration::ZERO),
            Err(payload) => {
                let message = format!("constructor panicked: {}", panic_message(payload.as_ref()));
                return self.failed(unit, FailureKind::Panicked, message, Duration::ZERO);
            }
        };

        debug!("Running unit {} with seed {}", unit, unit.seed);
        let started = Instant::now();
        let executed = self.execute(algorithm, Arc::clone(&instance), unit.seed);
        let execution_time = started.elapsed();

        let (outcome, ctx) = match executed {
            Ok(execution) => execution,
            Err((kind, message)) => return self.failed(unit, kind, message, execution_time),
        };

        let mut metrics = ctx.into_metrics();
        let solution = match outcome {
            Ok(solution) => solution,
            Err(e) => {
                let mut result = self.failed(unit, FailureKind::Errored, e.to_string(), execution_time);
                result.metrics = metrics.into_series();
                return result;
            }
        };

        let score = match panic::catch_unwind(AssertUnwindSafe(|| self.objective.evaluate(&solution))) {
            Ok(score) => score,
            Err(payload) => {
                let message = format!("objective panicked: {}", panic_message(payload.as_ref()));
                let mut result = self.failed(unit, FailureKind::Panicked, message, execution_time);
                result.metrics = metrics.into_series();
                return result;
            }
        };
        if metrics
            .series(OBJECTIVE_METRIC)
            .map_or(true, |series| series.is_empty())
        {
            metrics.record(OBJECTIVE_METRIC, score);
        }
        let series = metrics.into_series();

        let time_to_target = match (
            self.references.target(&unit.instance),
            series.get(OBJECTIVE_METRIC),
        ) {
            (Some(target), Some(observed)) => TimeToTarget::compute(observed, target, direction),
            _ => TimeToTarget::Unreached,
        };

        let status = match self.check(&unit.instance, &instance, &solution, score) {
            Ok(()) => UnitStatus::Completed,
            Err((kind, message)) => {
                warn!("Unit {} {}: {}", unit, kind, message);
                UnitStatus::failed(kind, message)
            }
        };
        let score = status.is_completed().then_some(score);

        WorkUnitResult {
            experiment: unit.experiment.clone(),
            algorithm: unit.algorithm_name(),
            configuration_id: unit.configuration.id,
            configuration_key: unit.configuration.key(),
            instance: unit.instance.clone(),
            repetition: unit.repetition,
            seed: unit.seed,
            status,
            solution: Some(solution),
            score,
            execution_time,
            time_to_target,
            metrics: series,
        }
    }

    /// Run the body inline, or on its own thread when a timeout is set.
    ///
    /// On timeout the run's cancellation token is tripped and the thread is
    /// left to wind down on its own; its result is dropped.
    fn execute(
        &self,
        algorithm: Box<dyn Algorithm<P>>,
        instance: Arc<P::Instance>,
        seed: u64,
    ) -> Result<Execution<P::Solution>, (FailureKind, String)> {
        let clock = self.clock;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let body = move || {
            let mut ctx = RunContext::new(seed, clock).with_cancellation(token);
            let outcome = algorithm.run(&instance, &mut ctx);
            (outcome, ctx)
        };

        let Some(limit) = self.timeout else {
            return panic::catch_unwind(AssertUnwindSafe(body))
                .map_err(|payload| (FailureKind::Panicked, panic_message(payload.as_ref())));
        };

        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::Builder::new()
            .name("hr-unit".to_string())
            .spawn(move || {
                // The receiver is gone once the unit timed out.
                let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(body)));
            })
            .map_err(|e| (FailureKind::Errored, format!("cannot start unit thread: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(Ok(execution)) => Ok(execution),
            Ok(Err(payload)) => Err((FailureKind::Panicked, panic_message(payload.as_ref()))),
            Err(RecvTimeoutError::Timeout) => {
                cancel.cancel();
                Err((
                    FailureKind::TimedOut,
                    format!("exceeded timeout of {} ms", limit.as_millis()),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err((
                FailureKind::Panicked,
                "unit thread exited without a result".to_string(),
            )),
        }
    }

    fn check(
        &self,
        instance_id: &str,
        instance: &P::Instance,
        solution: &P::Solution,
        score: f64,
    ) -> Result<(), (FailureKind, String)> {
        let infeasible = |message: String| (FailureKind::Infeasible, message);
        if score.is_nan() {
            return Err(infeasible("objective value is NaN".to_string()));
        }
        if let Some(validator) = &self.validator {
            panic::catch_unwind(AssertUnwindSafe(|| validator.validate(instance, solution)))
                .map_err(|payload| {
                    let message = format!("validator panicked: {}", panic_message(payload.as_ref()));
                    (FailureKind::Panicked, message)
                })?
                .map_err(infeasible)?;
        }
        if let Some(optimum) = self.references.optimum(instance_id) {
            if self.objective.direction().is_better(score, optimum) {
                return Err(infeasible(format!(
                    "score {score} is better than the known optimum {optimum} of {instance_id}"
                )));
            }
        }
        Ok(())
    }

    fn failed(
        &self,
        unit: &WorkUnit,
        kind: FailureKind,
        message: String,
        execution_time: Duration,
    ) -> WorkUnitResult<P::Solution> {
        warn!("Unit {} {}: {}", unit, kind, message);
        let mut result = WorkUnitResult::failure(unit, kind, message);
        result.execution_time = execution_time;
        result
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with a non-text payload".to_string()
    }
}
