//! Tunes number-partitioning heuristics with iterated racing.
//!
//! Environment:
//! - `HR_WORKERS`: worker threads, `0` for all cores (default `0`)
//! - `HR_SEED`: base seed for sampling and work units; overrides the seed of
//!   `HR_CONFIG` (default `42` without a configuration file)
//! - `HR_TIMEOUT_MS`: per-unit time limit (default none)
//! - `HR_CONFIG`: path to a JSON tuner configuration (optional)
//! - `HR_TUNING_FRACTION`: share of the instance pool raced on (default `0.5`)

use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hr_engine::{
    derive_seed, Experiment, ExperimentRunner, InstanceSelector, InstanceStore, ReferenceValues,
    Scheduler, SchedulerConfig, SchedulerEvaluator, SelectionConfig, UnitRunner,
};
use hr_grammar::{ComponentDescriptor, ComponentRegistry, FilterStrategy, GrammarBuilder};
use hr_optimizer::{RacingConfig, Tuner, TunerConfig};
use hr_types::{
    Algorithm, Capability, Component, Constructive, DeclaredType, HrResult, Improver, Objective,
    ParameterDescriptor, Problem, ProvidedKind, RunContext, Shake,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const INSTANCES: usize = 12;
const DEFAULT_SEED: u64 = 42;

struct Partition;

#[derive(Debug, Clone)]
struct Split {
    sides: Vec<bool>,
    imbalance: u64,
}

impl Split {
    fn new(numbers: &[u64], sides: Vec<bool>) -> Self {
        let (mut left, mut right) = (0u64, 0u64);
        for (n, side) in numbers.iter().zip(&sides) {
            if *side {
                left += n;
            } else {
                right += n;
            }
        }
        Self {
            sides,
            imbalance: left.abs_diff(right),
        }
    }

    fn flipped(&self, numbers: &[u64], index: usize) -> Self {
        let mut sides = self.sides.clone();
        sides[index] = !sides[index];
        Self::new(numbers, sides)
    }
}

impl Problem for Partition {
    type Instance = Vec<u64>;
    type Solution = Split;
    type Move = usize;
}

// ---- Constructives ----

struct RandomAssign;

impl Constructive<Partition> for RandomAssign {
    fn construct(&self, numbers: &Vec<u64>, ctx: &mut RunContext) -> Split {
        let sides = numbers.iter().map(|_| ctx.rng().gen_bool(0.5)).collect();
        Split::new(numbers, sides)
    }
}

/// Largest first, each number onto the lighter side.
struct Greedy;

impl Constructive<Partition> for Greedy {
    fn construct(&self, numbers: &Vec<u64>, _ctx: &mut RunContext) -> Split {
        let mut order: Vec<usize> = (0..numbers.len()).collect();
        order.sort_by(|a, b| numbers[*b].cmp(&numbers[*a]));
        let mut sides = vec![false; numbers.len()];
        let (mut left, mut right) = (0u64, 0u64);
        for i in order {
            if left <= right {
                sides[i] = true;
                left += numbers[i];
            } else {
                right += numbers[i];
            }
        }
        Split::new(numbers, sides)
    }
}

// ---- Improvers ----

struct FlipDescent {
    passes: i64,
}

impl Improver<Partition> for FlipDescent {
    fn improve(&self, numbers: &Vec<u64>, mut solution: Split, ctx: &mut RunContext) -> Split {
        for _ in 0..self.passes {
            if ctx.is_cancelled() {
                break;
            }
            let mut improved = false;
            for i in 0..numbers.len() {
                let candidate = solution.flipped(numbers, i);
                if candidate.imbalance < solution.imbalance {
                    solution = candidate;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        solution
    }
}

struct KeepAsIs;

impl Improver<Partition> for KeepAsIs {
    fn improve(&self, _numbers: &Vec<u64>, solution: Split, _ctx: &mut RunContext) -> Split {
        solution
    }
}

// ---- Shakes ----

struct RandomFlips {
    flips: i64,
}

impl Shake<Partition> for RandomFlips {
    fn shake(&self, numbers: &Vec<u64>, mut solution: Split, ctx: &mut RunContext) -> Split {
        if numbers.is_empty() {
            return solution;
        }
        for _ in 0..self.flips {
            let i = ctx.rng().gen_range(0..numbers.len());
            solution = solution.flipped(numbers, i);
        }
        solution
    }
}

// ---- Algorithms ----

struct MultiStart {
    name: String,
    constructive: Box<dyn Constructive<Partition>>,
    improver: Box<dyn Improver<Partition>>,
    starts: i64,
}

impl Algorithm<Partition> for MultiStart {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, numbers: &Vec<u64>, ctx: &mut RunContext) -> HrResult<Split> {
        let mut best: Option<Split> = None;
        for _ in 0..self.starts {
            if ctx.is_cancelled() {
                break;
            }
            let start = self.constructive.construct(numbers, ctx);
            let candidate = self.improver.improve(numbers, start, ctx);
            if best.as_ref().map_or(true, |b| candidate.imbalance < b.imbalance) {
                ctx.report(candidate.imbalance as f64);
                best = Some(candidate);
            }
        }
        Ok(best.unwrap_or_else(|| Split::new(numbers, vec![false; numbers.len()])))
    }
}

/// Iterated local search accepting worse solutions with a Boltzmann rule.
struct Ils {
    constructive: Box<dyn Constructive<Partition>>,
    improver: Box<dyn Improver<Partition>>,
    shake: Box<dyn Shake<Partition>>,
    iterations: i64,
    temperature: f64,
}

impl Algorithm<Partition> for Ils {
    fn name(&self) -> &str {
        "Ils"
    }

    fn run(&self, numbers: &Vec<u64>, ctx: &mut RunContext) -> HrResult<Split> {
        let start = self.constructive.construct(numbers, ctx);
        let mut current = self.improver.improve(numbers, start, ctx);
        let mut best = current.clone();
        ctx.report(best.imbalance as f64);

        for _ in 0..self.iterations {
            if ctx.is_cancelled() {
                break;
            }
            let shaken = self.shake.shake(numbers, current.clone(), ctx);
            let candidate = self.improver.improve(numbers, shaken, ctx);
            let delta = candidate.imbalance as f64 - current.imbalance as f64;
            if delta <= 0.0 || ctx.rng().gen::<f64>() < (-delta / self.temperature).exp() {
                current = candidate;
            }
            if current.imbalance < best.imbalance {
                best = current.clone();
                ctx.report(best.imbalance as f64);
            }
        }
        Ok(best)
    }
}

fn registry() -> HrResult<ComponentRegistry<Partition>> {
    let mut registry = ComponentRegistry::new();
    registry.register_with(
        ComponentDescriptor::builder("RandomAssign", Capability::Constructive)
            .constructor(|_| Ok(Component::constructive(RandomAssign))),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("Greedy", Capability::Constructive)
            .constructor(|_| Ok(Component::constructive(Greedy))),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("FlipDescent", Capability::Improver)
            .param(ParameterDescriptor::integer("passes", 1, 5))
            .constructor(|mut p| {
                Ok(Component::improver(FlipDescent {
                    passes: p.int("passes")?,
                }))
            }),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("KeepAsIs", Capability::Improver)
            .constructor(|_| Ok(Component::improver(KeepAsIs))),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("RandomFlips", Capability::Shake)
            .param(ParameterDescriptor::integer("flips", 1, 4))
            .constructor(|mut p| {
                Ok(Component::shake(RandomFlips {
                    flips: p.int("flips")?,
                }))
            }),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("MultiStart", Capability::Algorithm)
            .param(ParameterDescriptor::nested("constructive", Capability::Constructive))
            .param(ParameterDescriptor::nested("improver", Capability::Improver))
            .param(ParameterDescriptor::integer("starts", 1, 20))
            .param(ParameterDescriptor::provided(
                "name",
                DeclaredType::Text,
                ProvidedKind::AlgorithmName,
            ))
            .constructor(|mut p| {
                Ok(Component::algorithm(MultiStart {
                    name: p.text("name")?,
                    constructive: p.constructive("constructive")?,
                    improver: p.improver("improver")?,
                    starts: p.int("starts")?,
                }))
            }),
    )?;
    registry.register_with(
        ComponentDescriptor::builder("Ils", Capability::Algorithm)
            .param(ParameterDescriptor::nested("constructive", Capability::Constructive))
            .param(ParameterDescriptor::nested("improver", Capability::Improver))
            .param(ParameterDescriptor::nested("shake", Capability::Shake))
            .param(ParameterDescriptor::integer_step("iterations", 10, 100, 10))
            .param(ParameterDescriptor::log_real("temperature", 0.01, 100.0))
            .constructor(|mut p| {
                Ok(Component::algorithm(Ils {
                    constructive: p.constructive("constructive")?,
                    improver: p.improver("improver")?,
                    shake: p.shake("shake")?,
                    iterations: p.int("iterations")?,
                    temperature: p.real("temperature")?,
                }))
            }),
    )?;
    Ok(registry)
}

fn generate_instance(id: &str, seed: u64) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, "instances", "", id, 0));
    let size = rng.gen_range(30..=60);
    (0..size).map(|_| rng.gen_range(1..=10_000)).collect()
}

/// Size, mean, spread and largest share of the total.
fn instance_features(numbers: &Vec<u64>) -> Vec<f64> {
    let n = numbers.len().max(1) as f64;
    let total = numbers.iter().sum::<u64>() as f64;
    let mean = total / n;
    let variance = numbers.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    let largest = numbers.iter().copied().max().unwrap_or(0) as f64;
    vec![
        numbers.len() as f64,
        mean,
        variance.sqrt(),
        if total > 0.0 { largest / total } else { 0.0 },
    ]
}

fn env_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value {value:?} for {key}")),
        Err(_) => Ok(None),
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

/// Tuner settings from an optional JSON document. An explicit seed wins over
/// the document's; without a document the default seed applies.
fn load_tuner_config(json: Option<&str>, seed: Option<u64>) -> anyhow::Result<TunerConfig> {
    let config = match json {
        Some(json) => TunerConfig::from_json_str(json)?,
        None => TunerConfig::new("partition")
            .with_racing(
                RacingConfig::default()
                    .with_initial_candidates(16)
                    .with_first_test(3)
                    .with_budget(200),
            )
            .with_seed(DEFAULT_SEED),
    };
    Ok(match seed {
        Some(seed) => {
            if json.is_some() && seed != config.sampler.seed {
                info!("HR_SEED {} replaces configured seed {}", seed, config.sampler.seed);
            }
            config.with_seed(seed)
        }
        None => config,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let workers: usize = env_or("HR_WORKERS", 0)?;
    let timeout = env_opt::<u64>("HR_TIMEOUT_MS")?.map(Duration::from_millis);
    let fraction: f64 = env_or("HR_TUNING_FRACTION", 0.5)?;
    let json = match env::var("HR_CONFIG") {
        Ok(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read tuner configuration {path}"))?,
        ),
        Err(_) => None,
    };
    let tuner_config = load_tuner_config(json.as_deref(), env_opt("HR_SEED")?)?;
    let seed = tuner_config.sampler.seed;

    let registry = Arc::new(registry()?);
    let inventory = registry.inventory(&FilterStrategy::AdmitAll)?;
    let grammar = GrammarBuilder::new().build(&inventory)?;
    debug!("Parameter table:\n{}", grammar.render_parameter_table());

    let store = Arc::new(InstanceStore::<Partition>::new());
    let mut references = ReferenceValues::new();
    let mut instance_ids = Vec::with_capacity(INSTANCES);
    for i in 0..INSTANCES {
        let id = format!("p{i}");
        let numbers = store.get_or_load(&id, |id| Ok(generate_instance(id, seed)))?;
        // Perfect splits exist only for even totals.
        let target = (numbers.iter().sum::<u64>() % 2) as f64;
        references = references.with_target(id.clone(), target).with_optimum(id.clone(), target);
        instance_ids.push(id);
    }

    let selector = InstanceSelector::new(
        SelectionConfig::default()
            .with_fraction(fraction)
            .with_min_instances(3)
            .with_seed(seed),
    )?;
    let selection = selector.select_from_store(&*store, &instance_ids, instance_features)?;
    info!("Tuning instances: {}", selection.selected.join(", "));

    let objective = Objective::of_minimizing("imbalance", |s: &Split| s.imbalance as f64);
    let runner = UnitRunner::new(Arc::clone(&registry), objective).with_references(references);
    let scheduler = Scheduler::new(
        SchedulerConfig::default()
            .with_workers(workers)
            .with_timeout(timeout),
        runner,
        Arc::clone(&store),
    )?;
    info!(
        "Racing over {} of {} instances with {} workers",
        selection.selected.len(),
        instance_ids.len(),
        scheduler.workers()
    );

    let mut evaluator = SchedulerEvaluator::new(&scheduler, tuner_config.name.clone()).with_seed(seed);
    let mut tuner = Tuner::new(tuner_config);
    let outcome = tuner.run(&grammar, &mut evaluator, &selection.selected)?;
    info!(
        "Race stopped ({:?}) after {} rounds and {} evaluations",
        outcome.stop,
        outcome.rounds.len(),
        outcome.evaluations
    );
    for (rank, candidate) in outcome.ranked.iter().enumerate() {
        info!(
            "{}. {} rank sum {:.1}, mean imbalance {:?}, failures {}",
            rank + 1,
            candidate.configuration,
            candidate.rank_sum,
            candidate.mean_score,
            candidate.failures
        );
    }

    let finalists = outcome
        .ranked
        .iter()
        .take(3)
        .map(|c| c.configuration.clone());
    let experiment = Experiment::new("finalists")
        .with_configurations(finalists)
        .with_instances(instance_ids)
        .with_repetitions(5)
        .with_seed(seed);
    let report = ExperimentRunner::new(&scheduler).run(&experiment)?;
    for summary in &report.summaries {
        info!("{}", serde_json::to_string(summary)?);
    }
    for (instance, best) in &report.best_per_instance {
        info!(
            "{}: best imbalance {:?} by {}",
            instance, best.score, best.algorithm
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_seed_overrides_the_configuration_file() {
        let json = serde_json::to_string(&TunerConfig::new("file").with_seed(7)).unwrap();
        assert_eq!(load_tuner_config(Some(&json), None).unwrap().sampler.seed, 7);
        assert_eq!(load_tuner_config(Some(&json), Some(9)).unwrap().sampler.seed, 9);
        assert_eq!(load_tuner_config(None, None).unwrap().sampler.seed, DEFAULT_SEED);
        assert_eq!(load_tuner_config(None, Some(3)).unwrap().sampler.seed, 3);
    }

    #[test]
    fn features_describe_the_instance() {
        let features = instance_features(&vec![1, 3]);
        assert_eq!(features, vec![2.0, 2.0, 1.0, 0.75]);
        assert_eq!(instance_features(&Vec::new()), vec![0.0, 0.0, 0.0, 0.0]);
    }
}
