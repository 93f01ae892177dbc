//! Problem marker trait, one trait per component capability, and the
//! per-execution context handed to running algorithms.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::HrResult;
use crate::metrics::{ClockMode, MetricsCollector, OBJECTIVE_METRIC};

/// Ties together the instance and solution types of one optimization problem.
///
/// Implementors are usually unit structs used only at the type level.
pub trait Problem: Send + Sync + 'static {
    type Instance: Send + Sync + 'static;
    type Solution: Clone + Send + fmt::Debug + 'static;
    type Move: Send + 'static;
}

/// The role a component fills inside an assembled algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Algorithm,
    Constructive,
    Improver,
    Shake,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Algorithm => "algorithm",
            Self::Constructive => "constructive",
            Self::Improver => "improver",
            Self::Shake => "shake",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete algorithm: instance in, solution out.
pub trait Algorithm<P: Problem>: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, instance: &P::Instance, ctx: &mut RunContext) -> HrResult<P::Solution>;
}

/// Builds a solution from scratch.
pub trait Constructive<P: Problem>: Send + Sync {
    fn construct(&self, instance: &P::Instance, ctx: &mut RunContext) -> P::Solution;
}

/// Local search or any other procedure that should not worsen a solution.
pub trait Improver<P: Problem>: Send + Sync {
    fn improve(
        &self,
        instance: &P::Instance,
        solution: P::Solution,
        ctx: &mut RunContext,
    ) -> P::Solution;
}

/// Perturbation used to escape local optima.
pub trait Shake<P: Problem>: Send + Sync {
    fn shake(
        &self,
        instance: &P::Instance,
        solution: P::Solution,
        ctx: &mut RunContext,
    ) -> P::Solution;
}

/// A constructed component of any capability.
pub enum Component<P: Problem> {
    Algorithm(Box<dyn Algorithm<P>>),
    Constructive(Box<dyn Constructive<P>>),
    Improver(Box<dyn Improver<P>>),
    Shake(Box<dyn Shake<P>>),
}

impl<P: Problem> Component<P> {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Algorithm(_) => Capability::Algorithm,
            Self::Constructive(_) => Capability::Constructive,
            Self::Improver(_) => Capability::Improver,
            Self::Shake(_) => Capability::Shake,
        }
    }

    pub fn algorithm(alg: impl Algorithm<P> + 'static) -> Self {
        Self::Algorithm(Box::new(alg))
    }

    pub fn constructive(c: impl Constructive<P> + 'static) -> Self {
        Self::Constructive(Box::new(c))
    }

    pub fn improver(i: impl Improver<P> + 'static) -> Self {
        Self::Improver(Box::new(i))
    }

    pub fn shake(s: impl Shake<P> + 'static) -> Self {
        Self::Shake(Box::new(s))
    }

    pub fn into_algorithm(self) -> Option<Box<dyn Algorithm<P>>> {
        match self {
            Self::Algorithm(a) => Some(a),
            _ => None,
        }
    }
}

impl<P: Problem> fmt::Debug for Component<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Algorithm(a) => write!(f, "Component::Algorithm({})", a.name()),
            other => write!(f, "Component::{:?}", other.capability()),
        }
    }
}

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a running algorithm may touch besides the instance: its own
/// seeded random generator, its own metrics collector and the stop flag
/// tripped when the run exceeds its time limit.
///
/// Long-running loops should check [`RunContext::is_cancelled`] and return
/// early once it is set; the result of a cancelled run is discarded.
#[derive(Debug)]
pub struct RunContext {
    seed: u64,
    rng: ChaCha8Rng,
    metrics: MetricsCollector,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(seed: u64, clock: ClockMode) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            metrics: MetricsCollector::new(clock),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn elapsed(&self) -> Duration {
        self.metrics.elapsed()
    }

    /// Record an objective-value observation at the current elapsed time.
    pub fn report(&mut self, value: f64) {
        self.metrics.record(OBJECTIVE_METRIC, value);
    }

    pub fn record(&mut self, metric: &str, value: f64) {
        self.metrics.record(metric, value);
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn into_metrics(self) -> MetricsCollector {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    struct Toy;

    impl Problem for Toy {
        type Instance = Vec<u32>;
        type Solution = u32;
        type Move = ();
    }

    struct MaxElement;

    impl Algorithm<Toy> for MaxElement {
        fn name(&self) -> &str {
            "MaxElement"
        }

        fn run(&self, instance: &Vec<u32>, ctx: &mut RunContext) -> HrResult<u32> {
            let best = instance.iter().copied().max().unwrap_or_default();
            ctx.report(best as f64);
            Ok(best)
        }
    }

    #[test]
    fn component_reports_capability() {
        let component = Component::<Toy>::algorithm(MaxElement);
        assert_eq!(component.capability(), Capability::Algorithm);
        let alg = component.into_algorithm().unwrap();
        assert_eq!(alg.name(), "MaxElement");
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = RunContext::new(42, ClockMode::Logical);
        let mut b = RunContext::new(42, ClockMode::Logical);
        let xs: Vec<u64> = (0..8).map(|_| a.rng().gen()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.rng().gen()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn context_sees_cancellation_from_a_clone() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(7, ClockMode::Logical).with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(!RunContext::new(7, ClockMode::Logical).is_cancelled());
    }

    #[test]
    fn run_records_objective() {
        let mut ctx = RunContext::new(1, ClockMode::Logical);
        let solution = MaxElement.run(&vec![3, 9, 4], &mut ctx).unwrap();
        assert_eq!(solution, 9);
        let series = ctx.metrics().series(OBJECTIVE_METRIC).unwrap();
        assert_eq!(series.values().copied().collect::<Vec<_>>(), vec![9.0]);
    }
}
