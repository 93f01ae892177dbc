//! Test-only components and helpers on top of the shared toy catalogue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use hr_grammar::testing::{catalogue, Toy};
use hr_grammar::{ComponentDescriptor, ComponentRegistry, Configuration, ConfiguredComponent};
use hr_types::{
    Algorithm, Capability, Component, ExecutionError, HrResult, Objective, ParameterDescriptor,
    RunContext,
};

use crate::instances::InstanceStore;

pub const MULTISTART_B: &str =
    "Multistart{constructive=B{}, improver=Noop{}, iterations=2, name=<provided:algorithm_name>}";
pub const WALK: &str = "Walk{steps=20}";

/// Set once a `Patient` run noticed its cancellation.
pub static PATIENT_STOPPED: AtomicBool = AtomicBool::new(false);

struct Sleepy(u64);

impl Algorithm<Toy> for Sleepy {
    fn name(&self) -> &str {
        "Sleepy"
    }

    fn run(&self, _instance: &Vec<i64>, ctx: &mut RunContext) -> HrResult<i64> {
        let deadline = Instant::now() + Duration::from_millis(self.0);
        while Instant::now() < deadline {
            if ctx.is_cancelled() {
                return Err(cancelled("Sleepy"));
            }
            thread::sleep(Duration::from_millis(5));
        }
        ctx.report(0.0);
        Ok(0)
    }
}

/// Spins until cancelled, giving up after ten seconds.
struct Patient;

impl Algorithm<Toy> for Patient {
    fn name(&self) -> &str {
        "Patient"
    }

    fn run(&self, _instance: &Vec<i64>, ctx: &mut RunContext) -> HrResult<i64> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if ctx.is_cancelled() {
                PATIENT_STOPPED.store(true, Ordering::SeqCst);
                return Err(cancelled("Patient"));
            }
            thread::sleep(Duration::from_millis(1));
        }
        Ok(0)
    }
}

fn cancelled(algorithm: &str) -> hr_types::HrError {
    ExecutionError::AlgorithmFailed {
        algorithm: algorithm.to_string(),
        message: "cancelled".to_string(),
    }
    .into()
}

/// Random walk from zero reporting every position; the final position is the solution.
struct Walk(i64);

impl Algorithm<Toy> for Walk {
    fn name(&self) -> &str {
        "Walk"
    }

    fn run(&self, instance: &Vec<i64>, ctx: &mut RunContext) -> HrResult<i64> {
        let mut position = instance.iter().sum::<i64>();
        for _ in 0..self.0 {
            if ctx.is_cancelled() {
                return Err(cancelled("Walk"));
            }
            position += ctx.rng().gen_range(-100..=100);
            ctx.report(position as f64);
        }
        Ok(position)
    }
}

struct Boom;

impl Algorithm<Toy> for Boom {
    fn name(&self) -> &str {
        "Boom"
    }

    fn run(&self, _instance: &Vec<i64>, _ctx: &mut RunContext) -> HrResult<i64> {
        panic!("boom")
    }
}

struct Broken;

impl Algorithm<Toy> for Broken {
    fn name(&self) -> &str {
        "Broken"
    }

    fn run(&self, _instance: &Vec<i64>, _ctx: &mut RunContext) -> HrResult<i64> {
        Err(ExecutionError::AlgorithmFailed {
            algorithm: "Broken".to_string(),
            message: "no solution".to_string(),
        }
        .into())
    }
}

/// The toy catalogue plus `Sleepy`, `Patient`, `Walk`, `Boom`, `Broken` and
/// `BadCtor` algorithms. `BadCtor` panics while being constructed.
pub fn registry() -> Arc<ComponentRegistry<Toy>> {
    let mut registry = catalogue();
    registry
        .register_with(
            ComponentDescriptor::builder("Sleepy", Capability::Algorithm)
                .param(ParameterDescriptor::integer("millis", 0, 5000))
                .constructor(|mut p| Ok(Component::algorithm(Sleepy(p.int("millis")? as u64)))),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Patient", Capability::Algorithm)
                .constructor(|_| Ok(Component::algorithm(Patient))),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("BadCtor", Capability::Algorithm)
                .constructor(|_| -> HrResult<Component<Toy>> { panic!("constructor failed") }),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Walk", Capability::Algorithm)
                .param(ParameterDescriptor::integer("steps", 1, 100))
                .constructor(|mut p| Ok(Component::algorithm(Walk(p.int("steps")?)))),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Boom", Capability::Algorithm)
                .constructor(|_| Ok(Component::algorithm(Boom))),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Broken", Capability::Algorithm)
                .constructor(|_| Ok(Component::algorithm(Broken))),
        )
        .unwrap();
    Arc::new(registry)
}

pub fn objective() -> Objective<i64> {
    Objective::of_minimizing("value", |s: &i64| *s as f64)
}

pub fn configuration(id: usize, text: &str) -> Arc<Configuration> {
    Arc::new(Configuration::new(id, ConfiguredComponent::parse(text).unwrap()))
}

/// Multistart over `constructive` with a no-op improver.
pub fn multistart(id: usize, constructive: &str) -> Arc<Configuration> {
    configuration(
        id,
        &format!(
            "Multistart{{constructive={constructive}{{}}, improver=Noop{{}}, iterations=1, name=<provided:algorithm_name>}}"
        ),
    )
}

/// Instances `i0`, `i1`, `i2` with offsets 0, 1 and 5.
pub fn store() -> Arc<InstanceStore<Toy>> {
    let store = InstanceStore::new();
    store.insert("i0", vec![0]);
    store.insert("i1", vec![1]);
    store.insert("i2", vec![5]);
    Arc::new(store)
}

pub fn instance_ids() -> Vec<String> {
    vec!["i0".to_string(), "i1".to_string(), "i2".to_string()]
}
