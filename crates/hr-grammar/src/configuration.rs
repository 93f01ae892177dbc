//! Fully bound paths through the grammar and their instantiation into live
//! components.
//!
//! The canonical text form is `Name{param=value, nested=Other{...}}` with
//! parameters in name order. It doubles as the configuration identity used to
//! derive seeds, so it must stay stable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use hr_types::{
    Algorithm, Argument, Capability, Component, ConfigurationError, HrError, HrResult,
    ObjectiveDirection, ParameterBundle, ParameterKind, Problem, ProvidedKind,
};

use crate::registry::ComponentRegistry;

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    /// Categorical or ordinal choice that is not a plain number.
    Json(serde_json::Value),
    Component(ConfiguredComponent),
    /// Placeholder filled from the execution context.
    Provided(ProvidedKind),
}

impl ParameterValue {
    /// Normalise a categorical choice so numbers are stored as numbers.
    pub fn from_choice(value: &serde_json::Value) -> Self {
        if let Some(v) = value.as_i64() {
            Self::Int(v)
        } else if let Some(v) = value.as_f64() {
            Self::Float(v)
        } else {
            Self::Json(value.clone())
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // Debug keeps a decimal point so the value parses back as a float.
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Component(c) => write!(f, "{c}"),
            Self::Provided(kind) => write!(f, "<provided:{kind}>"),
        }
    }
}

/// One component with every parameter bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredComponent {
    pub component: String,
    pub params: BTreeMap<String, ParameterValue>,
}

impl ConfiguredComponent {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: ParameterValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn parse(text: &str) -> HrResult<Self> {
        let mut parser = Parser { input: text, pos: 0 };
        let component = parser.component()?;
        parser.skip_whitespace();
        if parser.pos != text.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(component)
    }

    /// Build the live component bottom-up through the registry's constructors.
    pub fn instantiate<P: Problem>(
        &self,
        registry: &ComponentRegistry<P>,
        context: &ProvidedContext,
    ) -> HrResult<Component<P>> {
        let descriptor = registry
            .get(&self.component)
            .ok_or_else(|| ConfigurationError::UnknownComponent {
                component: self.component.clone(),
            })?;

        if let Some(extra) = self
            .params
            .keys()
            .find(|name| descriptor.parameter(name).is_none())
        {
            return Err(ConfigurationError::TypeMismatch {
                component: self.component.clone(),
                parameter: extra.clone(),
                expected: "no such parameter".to_string(),
                actual: "a value".to_string(),
            }
            .into());
        }

        let mut bundle = ParameterBundle::new(self.component.clone());
        for parameter in descriptor.parameters() {
            let value =
                self.params
                    .get(&parameter.name)
                    .ok_or_else(|| ConfigurationError::MissingParameter {
                        component: self.component.clone(),
                        parameter: parameter.name.clone(),
                    })?;

            let argument = match (value, &parameter.kind) {
                (ParameterValue::Provided(kind), ParameterKind::Provided(declared)) if kind == declared => {
                    context.resolve(*kind, &self.component, &parameter.name)?
                }
                (ParameterValue::Component(nested), ParameterKind::Nested(capability)) => {
                    let built = nested.instantiate(registry, context)?;
                    expect_capability(&nested.component, *capability, built.capability())?;
                    Argument::Component(built)
                }
                (ParameterValue::Int(v), kind) if is_leaf(kind) => Argument::Int(*v),
                (ParameterValue::Float(v), kind) if is_leaf(kind) => Argument::Float(*v),
                (ParameterValue::Json(v), kind) if is_leaf(kind) => {
                    Argument::Json(v.clone())
                }
                (other, _) => {
                    return Err(ConfigurationError::TypeMismatch {
                        component: self.component.clone(),
                        parameter: parameter.name.clone(),
                        expected: parameter.declared.to_string(),
                        actual: other.to_string(),
                    }
                    .into())
                }
            };
            bundle.insert(parameter.name.clone(), argument);
        }

        let built = descriptor.construct(bundle)?;
        expect_capability(&self.component, descriptor.capability(), built.capability())?;
        Ok(built)
    }
}

fn is_leaf(kind: &ParameterKind) -> bool {
    !matches!(kind, ParameterKind::Nested(_) | ParameterKind::Provided(_))
}

fn expect_capability(component: &str, expected: Capability, actual: Capability) -> HrResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ConfigurationError::WrongCapability {
            component: component.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
        .into())
    }
}

impl fmt::Display for ConfiguredComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.component)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

impl FromStr for ConfiguredComponent {
    type Err = HrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A candidate algorithm: a numbered, fully bound root component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: usize,
    pub root: ConfiguredComponent,
}

impl Configuration {
    pub fn new(id: usize, root: ConfiguredComponent) -> Self {
        Self { id, root }
    }

    /// Canonical text of the root; identical bindings give identical keys.
    pub fn key(&self) -> String {
        self.root.to_string()
    }

    pub fn instantiate<P: Problem>(
        &self,
        registry: &ComponentRegistry<P>,
        context: &ProvidedContext,
    ) -> HrResult<Box<dyn Algorithm<P>>> {
        let component = self.root.instantiate(registry, context)?;
        let actual = component.capability();
        component.into_algorithm().ok_or_else(|| {
            ConfigurationError::WrongCapability {
                component: self.root.component.clone(),
                expected: Capability::Algorithm.to_string(),
                actual: actual.to_string(),
            }
            .into()
        })
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.root)
    }
}

/// Values the execution context supplies for provided parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidedContext {
    pub algorithm_name: String,
    pub maximizing: bool,
}

impl ProvidedContext {
    pub fn new(algorithm_name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            algorithm_name: algorithm_name.into(),
            maximizing: direction.is_maximizing(),
        }
    }

    fn resolve<P: Problem>(&self, kind: ProvidedKind, component: &str, parameter: &str) -> HrResult<Argument<P>> {
        match kind {
            ProvidedKind::Maximizing => Ok(Argument::Json(serde_json::Value::Bool(self.maximizing))),
            ProvidedKind::AlgorithmName => Ok(Argument::Json(serde_json::Value::String(
                self.algorithm_name.clone(),
            ))),
            ProvidedKind::Unknown => Err(ConfigurationError::MissingParameter {
                component: component.to_string(),
                parameter: parameter.to_string(),
            }
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Text parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> HrError {
        ConfigurationError::Parse {
            offset: self.pos,
            message: message.into(),
        }
        .into()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn expect(&mut self, c: char) -> HrResult<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn identifier(&mut self) -> HrResult<&'a str> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected identifier"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn component(&mut self) -> HrResult<ConfiguredComponent> {
        let name = self.identifier()?;
        let mut component = ConfiguredComponent::new(name);
        self.expect('{')?;
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(component);
        }

        loop {
            let parameter = self.identifier()?;
            self.expect('=')?;
            let value = self.value()?;
            if component.params.insert(parameter.to_string(), value).is_some() {
                return Err(self.error(format!("parameter {parameter} given twice")));
            }
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(component);
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn value(&mut self) -> HrResult<ParameterValue> {
        self.skip_whitespace();
        let rest = self.rest();
        match self.peek() {
            Some('<') => {
                let end = rest.find('>').ok_or_else(|| self.error("unterminated provided marker"))?;
                let kind = rest[1..end]
                    .strip_prefix("provided:")
                    .and_then(ProvidedKind::from_name)
                    .ok_or_else(|| self.error("unknown provided kind"))?;
                self.pos += end + 1;
                Ok(ParameterValue::Provided(kind))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let len = rest.find([',', '}']).unwrap_or(rest.len());
                let token = rest[..len].trim_end();
                let value = if token.contains(['.', 'e', 'E']) || token.contains("inf") {
                    token.parse::<f64>().map(ParameterValue::Float).ok()
                } else {
                    token.parse::<i64>().map(ParameterValue::Int).ok()
                };
                let value = value.ok_or_else(|| self.error(format!("invalid number {token}")))?;
                self.pos += len;
                Ok(value)
            }
            Some(c) if c.is_alphabetic() && self.starts_component() => {
                Ok(ParameterValue::Component(self.component()?))
            }
            Some(_) => {
                let mut stream =
                    serde_json::Deserializer::from_str(rest).into_iter::<serde_json::Value>();
                match stream.next() {
                    Some(Ok(value)) => {
                        self.pos += stream.byte_offset();
                        Ok(ParameterValue::from_choice(&value))
                    }
                    _ => Err(self.error("invalid value")),
                }
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn starts_component(&self) -> bool {
        let rest = self.rest();
        let ident = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        rest[ident..].trim_start().starts_with('{')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Toy};
    use hr_types::{ClockMode, RunContext};
    use serde_json::json;

    fn multistart(constructive: &str, iterations: i64) -> ConfiguredComponent {
        ConfiguredComponent::new("Multistart")
            .with(
                "constructive",
                ParameterValue::Component(ConfiguredComponent::new(constructive)),
            )
            .with(
                "improver",
                ParameterValue::Component(
                    ConfiguredComponent::new("Nudge").with("step", ParameterValue::Int(2)),
                ),
            )
            .with("iterations", ParameterValue::Int(iterations))
            .with("name", ParameterValue::Provided(ProvidedKind::AlgorithmName))
    }

    #[test]
    fn canonical_text_orders_parameters_by_name() {
        let text = multistart("A", 3).to_string();
        assert_eq!(
            text,
            "Multistart{constructive=A{}, improver=Nudge{step=2}, iterations=3, name=<provided:algorithm_name>}"
        );
    }

    #[test]
    fn parse_reads_canonical_text_back() {
        let original = ConfiguredComponent::new("Ils")
            .with("alpha", ParameterValue::Float(1.0))
            .with("mode", ParameterValue::Json(json!("best")))
            .with("maximizing", ParameterValue::Provided(ProvidedKind::Maximizing))
            .with(
                "shake",
                ParameterValue::Component(
                    ConfiguredComponent::new("Jitter").with("amplitude", ParameterValue::Int(-1)),
                ),
            )
            .with("constructive", ParameterValue::Component(ConfiguredComponent::new("B")));
        let parsed: ConfiguredComponent = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_tolerates_whitespace() {
        let parsed = ConfiguredComponent::parse("  Nudge { step = 3 }  ").unwrap();
        assert_eq!(parsed.params["step"], ParameterValue::Int(3));
    }

    #[test]
    fn parse_errors_carry_offset() {
        let err = ConfiguredComponent::parse("Nudge{step=}").unwrap_err();
        match err {
            HrError::Configuration(ConfigurationError::Parse { offset, .. }) => assert_eq!(offset, 11),
            other => panic!("unexpected error {other}"),
        }
        assert!(ConfiguredComponent::parse("Nudge{step=1} extra").is_err());
        assert!(ConfiguredComponent::parse("Nudge{step=1, step=2}").is_err());
    }

    #[test]
    fn numeric_choices_are_normalised() {
        assert_eq!(ParameterValue::from_choice(&json!(3)), ParameterValue::Int(3));
        assert_eq!(ParameterValue::from_choice(&json!(0.5)), ParameterValue::Float(0.5));
        assert_eq!(
            ParameterValue::from_choice(&json!(true)),
            ParameterValue::Json(json!(true))
        );
    }

    #[test]
    fn instantiate_resolves_provided_values() {
        let registry = testing::catalogue();
        let configuration = Configuration::new(0, multistart("B", 2));
        let context = ProvidedContext::new("baseline", ObjectiveDirection::Minimize);
        let algorithm = configuration.instantiate(&registry, &context).unwrap();
        assert_eq!(algorithm.name(), "baseline");

        let mut ctx = RunContext::new(7, ClockMode::Logical);
        // B starts at 2 + sum(instance), Nudge subtracts its step.
        let solution = algorithm.run(&vec![1, 1], &mut ctx).unwrap();
        assert_eq!(solution, 2);
    }

    #[test]
    fn instantiate_reports_missing_parameter() {
        let registry = testing::catalogue();
        let mut root = multistart("A", 1);
        root.params.remove("iterations");
        let err = root
            .instantiate::<Toy>(&registry, &ProvidedContext::new("x", ObjectiveDirection::Minimize))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HrError::Configuration(ConfigurationError::MissingParameter { .. })
        ));
    }

    #[test]
    fn instantiate_rejects_wrong_nested_capability() {
        let registry = testing::catalogue();
        let root = multistart("A", 1).with(
            "improver",
            ParameterValue::Component(ConfiguredComponent::new("B")),
        );
        let err = root
            .instantiate::<Toy>(&registry, &ProvidedContext::new("x", ObjectiveDirection::Minimize))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HrError::Configuration(ConfigurationError::WrongCapability { .. })
        ));
    }

    #[test]
    fn non_algorithm_root_is_rejected() {
        let registry = testing::catalogue();
        let configuration = Configuration::new(1, ConfiguredComponent::new("A"));
        let result = configuration
            .instantiate(&registry, &ProvidedContext::new("x", ObjectiveDirection::Minimize));
        assert!(result.is_err());
    }

    #[test]
    fn key_ignores_id() {
        let a = Configuration::new(0, multistart("A", 2));
        let b = Configuration::new(5, multistart("A", 2));
        assert_eq!(a.key(), b.key());
        assert_ne!(a.to_string(), b.to_string());
    }
}
