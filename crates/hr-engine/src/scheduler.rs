//! Bounded parallel execution of work units.

use crossbeam_channel::{Receiver, Sender};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hr_types::{config_error, ExecutionError, HrResult, ObjectiveDirection, Problem};
use tracing::{debug, error, info, warn};

use crate::instances::InstanceStore;
use crate::runner::{panic_message, UnitRunner};
use crate::workunit::{FailureKind, WorkUnit, WorkUnitResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; `0` means the available hardware parallelism.
    pub workers: usize,
    /// Units queued ahead of the workers, and finished results buffered
    /// ahead of the consumer, before submission blocks.
    pub queue_capacity: usize,
    /// Per-unit wall-clock limit in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 64,
            timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Worker count with `0` resolved.
    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        }
    }

    pub fn validate(&self) -> HrResult<()> {
        if self.queue_capacity == 0 {
            return Err(config_error!("queue_capacity must be positive"));
        }
        if self.timeout_ms == Some(0) {
            return Err(config_error!("timeout_ms must be positive when set"));
        }
        Ok(())
    }
}

/// Results of one submission, in completion order.
///
/// Iteration ends once every worker of the submission has finished. Results
/// are buffered up to the queue capacity; a stream that is not drained stalls
/// its workers and, through them, the pull of further units. Dropping the
/// stream stops the submission after the units already running.
pub struct ResultStream<S> {
    results: Receiver<WorkUnitResult<S>>,
    submitted: Arc<AtomicUsize>,
    received: usize,
}

impl<S> ResultStream<S> {
    /// Units pulled from the submission and queued so far. Final once the
    /// stream is exhausted.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

impl<S> Iterator for ResultStream<S> {
    type Item = WorkUnitResult<S>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.results.recv().ok()?;
        self.received += 1;
        Some(result)
    }
}

/// Runs work units on a dedicated `rayon` pool fed through a bounded queue.
pub struct Scheduler<P: Problem> {
    config: SchedulerConfig,
    workers: usize,
    pool: ThreadPool,
    runner: Arc<UnitRunner<P>>,
    instances: Arc<InstanceStore<P>>,
}

impl<P: Problem> Scheduler<P> {
    /// The configured timeout, when set, replaces the runner's own.
    pub fn new(
        config: SchedulerConfig,
        runner: UnitRunner<P>,
        instances: Arc<InstanceStore<P>>,
    ) -> HrResult<Self> {
        config.validate()?;
        let workers = config.resolved_workers();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("hr-worker-{i}"))
            .panic_handler(|payload| {
                error!("Worker task panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|e| ExecutionError::Pool {
                message: e.to_string(),
            })?;

        let runner = match config.timeout() {
            Some(timeout) => runner.with_timeout(Some(timeout)),
            None => runner,
        };

        debug!(
            "Scheduler ready with {} workers and queue capacity {}",
            workers, config.queue_capacity
        );
        Ok(Self {
            config,
            workers,
            pool,
            runner: Arc::new(runner),
            instances,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.runner.objective().direction()
    }

    pub fn instances(&self) -> &Arc<InstanceStore<P>> {
        &self.instances
    }

    /// Start executing `units` and return their results as they complete.
    ///
    /// Units are pulled lazily by a feeder thread that blocks while the
    /// bounded queue is full, so a lazy iterator is never drained faster than
    /// the workers and the consumer keep up. Every submitted unit yields
    /// exactly one result.
    pub fn submit<I>(&self, units: I) -> HrResult<ResultStream<P::Solution>>
    where
        I: IntoIterator<Item = WorkUnit>,
        I::IntoIter: Send + 'static,
    {
        let capacity = self.config.queue_capacity;
        let (unit_tx, unit_rx) = crossbeam_channel::bounded::<WorkUnit>(capacity);
        let (result_tx, result_rx) = crossbeam_channel::bounded(capacity);
        let submitted = Arc::new(AtomicUsize::new(0));

        let units = units.into_iter();
        let counter = Arc::clone(&submitted);
        thread::Builder::new()
            .name("hr-feeder".to_string())
            .spawn(move || feed(units, unit_tx, &counter))
            .map_err(|e| ExecutionError::Pool {
                message: format!("cannot start feeder: {e}"),
            })?;

        for _ in 0..self.workers {
            let units = unit_rx.clone();
            let results = result_tx.clone();
            let runner = Arc::clone(&self.runner);
            let instances = Arc::clone(&self.instances);
            self.pool
                .spawn(move || work(&runner, &instances, units, results));
        }

        debug!(
            "Submission started on {} workers with capacity {}",
            self.workers, capacity
        );
        Ok(ResultStream {
            results: result_rx,
            submitted,
            received: 0,
        })
    }

    /// Execute `units` and wait for all of them.
    pub fn run_all<I>(&self, units: I) -> HrResult<Vec<WorkUnitResult<P::Solution>>>
    where
        I: IntoIterator<Item = WorkUnit>,
        I::IntoIter: Send + 'static,
    {
        let mut stream = self.submit(units)?;
        let results: Vec<_> = stream.by_ref().collect();
        if results.len() != stream.submitted() {
            return Err(ExecutionError::MissingResults {
                expected: stream.submitted(),
                received: results.len(),
            }
            .into());
        }

        let failures = results.iter().filter(|r| !r.is_completed()).count();
        info!(
            "Batch finished: {} units, {} failed",
            results.len(),
            failures
        );
        Ok(results)
    }
}

fn feed(units: impl Iterator<Item = WorkUnit>, queue: Sender<WorkUnit>, submitted: &AtomicUsize) {
    for unit in units {
        if queue.send(unit).is_err() {
            warn!("Work queue closed before every unit was queued");
            break;
        }
        submitted.fetch_add(1, Ordering::SeqCst);
    }
}

fn work<P: Problem>(
    runner: &UnitRunner<P>,
    instances: &InstanceStore<P>,
    units: Receiver<WorkUnit>,
    results: Sender<WorkUnitResult<P::Solution>>,
) {
    for unit in units.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match instances.get(&unit.instance) {
            Ok(instance) => runner.run(&unit, instance),
            Err(e) => WorkUnitResult::failure(&unit, FailureKind::Errored, e.to_string()),
        }));
        let result = outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!("Unit {} panicked outside its algorithm: {}", unit, message);
            WorkUnitResult::failure(&unit, FailureKind::Panicked, message)
        });
        if results.send(result).is_err() {
            break;
        }
    }
}
