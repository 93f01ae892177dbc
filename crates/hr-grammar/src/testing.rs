//! Toy problem and component catalogue shared by the unit tests.

use hr_types::{
    Algorithm, Capability, Component, Constructive, DeclaredType, HrResult, Improver,
    ParameterDescriptor, Problem, ProvidedKind, RunContext, Shake,
};
use rand::Rng;
use serde_json::json;

use crate::registry::{ComponentDescriptor, ComponentRegistry};

/// Minimize an integer; the instance is a list of offsets added to every start.
pub struct Toy;

impl Problem for Toy {
    type Instance = Vec<i64>;
    type Solution = i64;
    type Move = ();
}

struct Constant(i64);

impl Constructive<Toy> for Constant {
    fn construct(&self, instance: &Vec<i64>, _ctx: &mut RunContext) -> i64 {
        self.0 + instance.iter().sum::<i64>()
    }
}

struct Nudge(i64);

impl Improver<Toy> for Nudge {
    fn improve(&self, _instance: &Vec<i64>, solution: i64, _ctx: &mut RunContext) -> i64 {
        solution - self.0
    }
}

struct Noop;

impl Improver<Toy> for Noop {
    fn improve(&self, _instance: &Vec<i64>, solution: i64, _ctx: &mut RunContext) -> i64 {
        solution
    }
}

struct Jitter(i64);

impl Shake<Toy> for Jitter {
    fn shake(&self, _instance: &Vec<i64>, solution: i64, ctx: &mut RunContext) -> i64 {
        solution + ctx.rng().gen_range(0..=self.0)
    }
}

pub struct Multistart {
    name: String,
    constructive: Box<dyn Constructive<Toy>>,
    improver: Box<dyn Improver<Toy>>,
    iterations: i64,
}

impl Algorithm<Toy> for Multistart {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, instance: &Vec<i64>, ctx: &mut RunContext) -> HrResult<i64> {
        let mut best = i64::MAX;
        for _ in 0..self.iterations {
            if ctx.is_cancelled() {
                break;
            }
            let start = self.constructive.construct(instance, ctx);
            let candidate = self.improver.improve(instance, start, ctx);
            best = best.min(candidate);
            ctx.report(best as f64);
        }
        Ok(best)
    }
}

/// Construct, shake once, then pull the kept value `round(4 * alpha)` towards
/// the better side. Mode `best` keeps the better of start and shaken, `first`
/// always takes the shaken one.
pub struct Ils {
    constructive: Box<dyn Constructive<Toy>>,
    shake: Box<dyn Shake<Toy>>,
    alpha: f64,
    keep_best: bool,
    maximizing: bool,
}

impl Algorithm<Toy> for Ils {
    fn name(&self) -> &str {
        "Ils"
    }

    fn run(&self, instance: &Vec<i64>, ctx: &mut RunContext) -> HrResult<i64> {
        let start = self.constructive.construct(instance, ctx);
        let shaken = self.shake.shake(instance, start, ctx);
        let kept = match (self.keep_best, self.maximizing) {
            (false, _) => shaken,
            (true, true) => start.max(shaken),
            (true, false) => start.min(shaken),
        };
        let pull = (self.alpha * 4.0).round() as i64;
        let best = if self.maximizing { kept + pull } else { kept - pull };
        ctx.report(best as f64);
        Ok(best)
    }
}

pub fn constant_constructive(value: i64) -> Component<Toy> {
    Component::constructive(Constant(value))
}

pub fn noop_improver() -> Component<Toy> {
    Component::improver(Noop)
}

pub fn constructive_descriptor(name: &str, value: i64) -> ComponentDescriptor<Toy> {
    ComponentDescriptor::builder(name, Capability::Constructive)
        .constructor(move |_| Ok(constant_constructive(value)))
        .build()
        .unwrap()
}

/// Registration order: A, B, C, Nudge, Noop, Jitter, Multistart, Ils.
pub fn catalogue() -> ComponentRegistry<Toy> {
    let mut registry = ComponentRegistry::new();
    for (name, value) in [("A", 1), ("B", 2), ("C", 3)] {
        registry
            .register(constructive_descriptor(name, value))
            .unwrap();
    }

    registry
        .register_with(
            ComponentDescriptor::builder("Nudge", Capability::Improver)
                .param(ParameterDescriptor::integer("step", 1, 3))
                .constructor(|mut p| Ok(Component::improver(Nudge(p.int("step")?)))),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Noop", Capability::Improver)
                .constructor(|_| Ok(noop_improver())),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Jitter", Capability::Shake)
                .param(ParameterDescriptor::integer("amplitude", 0, 2))
                .constructor(|mut p| Ok(Component::shake(Jitter(p.int("amplitude")?)))),
        )
        .unwrap();

    registry
        .register_with(
            ComponentDescriptor::builder("Multistart", Capability::Algorithm)
                .param(ParameterDescriptor::nested("constructive", Capability::Constructive))
                .param(ParameterDescriptor::nested("improver", Capability::Improver))
                .param(ParameterDescriptor::integer("iterations", 1, 4))
                .param(ParameterDescriptor::provided(
                    "name",
                    DeclaredType::Text,
                    ProvidedKind::AlgorithmName,
                ))
                .constructor(|mut p| {
                    Ok(Component::algorithm(Multistart {
                        name: p.text("name")?,
                        constructive: p.constructive("constructive")?,
                        improver: p.improver("improver")?,
                        iterations: p.int("iterations")?,
                    }))
                }),
        )
        .unwrap();
    registry
        .register_with(
            ComponentDescriptor::builder("Ils", Capability::Algorithm)
                .param(ParameterDescriptor::nested("constructive", Capability::Constructive))
                .param(ParameterDescriptor::nested("shake", Capability::Shake))
                .param(ParameterDescriptor::real("alpha", 0.0, 1.0))
                .param(ParameterDescriptor::categorical(
                    "mode",
                    DeclaredType::Text,
                    vec![json!("first"), json!("best")],
                ))
                .param(ParameterDescriptor::provided(
                    "maximizing",
                    DeclaredType::Bool,
                    ProvidedKind::Maximizing,
                ))
                .constructor(|mut p| {
                    Ok(Component::algorithm(Ils {
                        constructive: p.constructive("constructive")?,
                        shake: p.shake("shake")?,
                        alpha: p.real("alpha")?,
                        keep_best: p.text("mode")? == "best",
                        maximizing: p.bool("maximizing")?,
                    }))
                }),
        )
        .unwrap();
    registry
}
