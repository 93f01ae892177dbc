//! Resolved constructor arguments handed to a component's builder function.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{ConfigurationError, HrResult};
use crate::problem::{Algorithm, Component, Constructive, Improver, Problem, Shake};

/// A single resolved argument.
pub enum Argument<P: Problem> {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
    Component(Component<P>),
}

impl<P: Problem> Argument<P> {
    fn describe(&self) -> String {
        match self {
            Self::Int(_) => "int".to_string(),
            Self::Float(_) => "real".to_string(),
            Self::Json(v) => format!("json {v}"),
            Self::Component(c) => format!("component<{}>", c.capability()),
        }
    }
}

impl<P: Problem> fmt::Debug for Argument<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Json(v) => write!(f, "Json({v})"),
            Self::Component(c) => write!(f, "{c:?}"),
        }
    }
}

/// Named arguments for one component. Each argument can be taken once.
#[derive(Debug)]
pub struct ParameterBundle<P: Problem> {
    component: String,
    args: BTreeMap<String, Argument<P>>,
}

macro_rules! take_component {
    ($fn_name:ident, $variant:ident, $trait_name:ident) => {
        pub fn $fn_name(&mut self, name: &str) -> HrResult<Box<dyn $trait_name<P>>> {
            match self.take(name)? {
                Argument::Component(Component::$variant(c)) => Ok(c),
                other => Err(self.mismatch(name, stringify!($fn_name), &other)),
            }
        }
    };
}

impl<P: Problem> ParameterBundle<P> {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn insert(&mut self, name: impl Into<String>, arg: Argument<P>) {
        self.args.insert(name.into(), arg);
    }

    pub fn with(mut self, name: impl Into<String>, arg: Argument<P>) -> Self {
        self.insert(name, arg);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn take(&mut self, name: &str) -> HrResult<Argument<P>> {
        self.args.remove(name).ok_or_else(|| {
            ConfigurationError::MissingParameter {
                component: self.component.clone(),
                parameter: name.to_string(),
            }
            .into()
        })
    }

    fn mismatch(&self, name: &str, expected: &str, actual: &Argument<P>) -> crate::HrError {
        ConfigurationError::TypeMismatch {
            component: self.component.clone(),
            parameter: name.to_string(),
            expected: expected.to_string(),
            actual: actual.describe(),
        }
        .into()
    }

    pub fn int(&mut self, name: &str) -> HrResult<i64> {
        match self.take(name)? {
            Argument::Int(v) => Ok(v),
            Argument::Json(v) if v.is_i64() => v.as_i64().ok_or_else(|| unreachable_json(name)),
            other => Err(self.mismatch(name, "int", &other)),
        }
    }

    pub fn real(&mut self, name: &str) -> HrResult<f64> {
        match self.take(name)? {
            Argument::Float(v) => Ok(v),
            Argument::Int(v) => Ok(v as f64),
            Argument::Json(v) if v.is_number() => {
                v.as_f64().ok_or_else(|| unreachable_json(name))
            }
            other => Err(self.mismatch(name, "real", &other)),
        }
    }

    pub fn bool(&mut self, name: &str) -> HrResult<bool> {
        match self.take(name)? {
            Argument::Json(serde_json::Value::Bool(b)) => Ok(b),
            other => Err(self.mismatch(name, "bool", &other)),
        }
    }

    pub fn text(&mut self, name: &str) -> HrResult<String> {
        match self.take(name)? {
            Argument::Json(serde_json::Value::String(s)) => Ok(s),
            other => Err(self.mismatch(name, "text", &other)),
        }
    }

    pub fn json(&mut self, name: &str) -> HrResult<serde_json::Value> {
        match self.take(name)? {
            Argument::Json(v) => Ok(v),
            Argument::Int(v) => Ok(serde_json::Value::from(v)),
            Argument::Float(v) => Ok(serde_json::Value::from(v)),
            other => Err(self.mismatch(name, "json", &other)),
        }
    }

    take_component!(algorithm, Algorithm, Algorithm);
    take_component!(constructive, Constructive, Constructive);
    take_component!(improver, Improver, Improver);
    take_component!(shake, Shake, Shake);
}

fn unreachable_json(name: &str) -> crate::HrError {
    crate::internal_error!("numeric json for {name} lost its value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::RunContext;
    use serde_json::json;

    struct Toy;

    impl Problem for Toy {
        type Instance = ();
        type Solution = i32;
        type Move = ();
    }

    struct Zero;

    impl Constructive<Toy> for Zero {
        fn construct(&self, _instance: &(), _ctx: &mut RunContext) -> i32 {
            0
        }
    }

    #[test]
    fn typed_takers() {
        let mut bundle = ParameterBundle::<Toy>::new("Grasp")
            .with("alpha", Argument::Float(0.25))
            .with("iterations", Argument::Int(10))
            .with("mode", Argument::Json(json!("best")))
            .with("maximizing", Argument::Json(json!(true)))
            .with("constructive", Argument::Component(Component::constructive(Zero)));

        assert_eq!(bundle.real("alpha").unwrap(), 0.25);
        assert_eq!(bundle.int("iterations").unwrap(), 10);
        assert_eq!(bundle.text("mode").unwrap(), "best");
        assert!(bundle.bool("maximizing").unwrap());
        assert!(bundle.constructive("constructive").is_ok());
        assert!(bundle.is_empty());
    }

    #[test]
    fn missing_parameter_is_reported() {
        let mut bundle = ParameterBundle::<Toy>::new("Grasp");
        let err = bundle.int("alpha").unwrap_err();
        assert!(err.to_string().contains("Missing parameter alpha"));
    }

    #[test]
    fn wrong_component_capability_is_a_mismatch() {
        let mut bundle = ParameterBundle::<Toy>::new("Ils")
            .with("improver", Argument::Component(Component::constructive(Zero)));
        let err = match bundle.improver("improver") {
            Err(e) => e,
            Ok(_) => panic!("constructive accepted as improver"),
        };
        assert!(matches!(
            err,
            crate::HrError::Configuration(ConfigurationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn integer_widens_to_real() {
        let mut bundle = ParameterBundle::<Toy>::new("Sa").with("t0", Argument::Int(3));
        assert_eq!(bundle.real("t0").unwrap(), 3.0);
    }
}
