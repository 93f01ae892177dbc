//! Constructor parameter descriptions for configurable components.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::problem::Capability;

/// The type a component's constructor declares for one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Bool,
    Int,
    Real,
    Text,
    Component(Capability),
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Real => write!(f, "real"),
            Self::Text => write!(f, "text"),
            Self::Component(c) => write!(f, "component<{c}>"),
        }
    }
}

/// Values supplied by the execution context instead of being searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvidedKind {
    Unknown,
    /// Whether the enclosing objective is maximized.
    Maximizing,
    /// Display name of the algorithm being built.
    AlgorithmName,
}

impl ProvidedKind {
    /// Declared parameter types this kind may bind to.
    pub fn compatible_types(self) -> &'static [DeclaredType] {
        match self {
            Self::Unknown => &[],
            Self::Maximizing => &[DeclaredType::Bool],
            Self::AlgorithmName => &[DeclaredType::Text],
        }
    }

    pub fn can_bind(self, declared: DeclaredType) -> bool {
        self.compatible_types().contains(&declared)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Maximizing => "maximizing",
            Self::AlgorithmName => "algorithm_name",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unknown" => Some(Self::Unknown),
            "maximizing" => Some(Self::Maximizing),
            "algorithm_name" => Some(Self::AlgorithmName),
            _ => None,
        }
    }
}

impl fmt::Display for ProvidedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes how a parameter value is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Integer range `[min, max]` inclusive, sampled on multiples of `step` from `min`.
    Integer { min: i64, max: i64, step: i64 },
    /// Real range `[min, max]`, log-uniform when `log` is set.
    Real { min: f64, max: f64, log: bool },
    /// Unordered choices.
    Categorical { values: Vec<serde_json::Value> },
    /// Ordered choices.
    Ordinal { values: Vec<serde_json::Value> },
    /// Another component, chosen among the implementations of a capability.
    Nested(Capability),
    /// Filled from the execution context, never searched.
    Provided(ProvidedKind),
}

impl ParameterKind {
    pub fn is_searchable(&self) -> bool {
        !matches!(self, Self::Provided(_))
    }
}

/// A single constructor parameter of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub declared: DeclaredType,
    pub kind: ParameterKind,
}

impl ParameterDescriptor {
    pub fn integer(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self::integer_step(name, min, max, 1)
    }

    pub fn integer_step(name: impl Into<String>, min: i64, max: i64, step: i64) -> Self {
        Self {
            name: name.into(),
            declared: DeclaredType::Int,
            kind: ParameterKind::Integer { min, max, step },
        }
    }

    pub fn real(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            declared: DeclaredType::Real,
            kind: ParameterKind::Real { min, max, log: false },
        }
    }

    pub fn log_real(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            declared: DeclaredType::Real,
            kind: ParameterKind::Real { min, max, log: true },
        }
    }

    pub fn categorical(
        name: impl Into<String>,
        declared: DeclaredType,
        values: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            declared,
            kind: ParameterKind::Categorical { values },
        }
    }

    pub fn ordinal(
        name: impl Into<String>,
        declared: DeclaredType,
        values: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.into(),
            declared,
            kind: ParameterKind::Ordinal { values },
        }
    }

    pub fn nested(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            declared: DeclaredType::Component(capability),
            kind: ParameterKind::Nested(capability),
        }
    }

    pub fn provided(name: impl Into<String>, declared: DeclaredType, kind: ProvidedKind) -> Self {
        Self {
            name: name.into(),
            declared,
            kind: ParameterKind::Provided(kind),
        }
    }

    /// Check the domain is well formed and agrees with the declared type.
    ///
    /// Provided parameters are only checked against their declared type when
    /// the grammar is built.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("parameter name is empty".to_string());
        }
        match &self.kind {
            ParameterKind::Integer { min, max, step } => {
                if min > max {
                    return Err(format!("min {min} greater than max {max}"));
                }
                if *step < 1 {
                    return Err(format!("step must be at least 1, got {step}"));
                }
                expect_declared(self.declared, &[DeclaredType::Int])
            }
            ParameterKind::Real { min, max, log } => {
                if !(min.is_finite() && max.is_finite()) {
                    return Err("real bounds must be finite".to_string());
                }
                if min > max {
                    return Err(format!("min {min} greater than max {max}"));
                }
                if *log && *min <= 0.0 {
                    return Err(format!("log range requires min > 0, got {min}"));
                }
                expect_declared(self.declared, &[DeclaredType::Real])
            }
            ParameterKind::Categorical { values } | ParameterKind::Ordinal { values } => {
                if values.is_empty() {
                    return Err("at least one value is required".to_string());
                }
                if let Some(bad) = values.iter().find(|v| !value_fits(self.declared, v)) {
                    return Err(format!("value {bad} does not fit declared type {}", self.declared));
                }
                Ok(())
            }
            ParameterKind::Nested(capability) => {
                expect_declared(self.declared, &[DeclaredType::Component(*capability)])
            }
            ParameterKind::Provided(_) => Ok(()),
        }
    }
}

fn expect_declared(declared: DeclaredType, allowed: &[DeclaredType]) -> Result<(), String> {
    if allowed.contains(&declared) {
        Ok(())
    } else {
        Err(format!("declared type {declared} does not match the parameter domain"))
    }
}

fn value_fits(declared: DeclaredType, value: &serde_json::Value) -> bool {
    match declared {
        DeclaredType::Bool => value.is_boolean(),
        DeclaredType::Int => value.is_i64(),
        DeclaredType::Real => value.is_number(),
        DeclaredType::Text => value.is_string(),
        DeclaredType::Component(_) => false,
    }
}
