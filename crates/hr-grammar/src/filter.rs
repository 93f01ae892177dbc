//! Whitelist / blacklist gate applied to the registry before the grammar is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use hr_types::{Capability, FilterError, HrResult, Problem};
use tracing::debug;

use crate::registry::{ComponentDescriptor, ComponentRegistry};

/// The single filter strategy active for a process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterStrategy {
    /// Everything registered is admitted.
    #[default]
    AdmitAll,
    /// Only the named components are admitted.
    Whitelist(BTreeSet<String>),
    /// Everything except the named components is admitted.
    Blacklist(BTreeSet<String>),
}

impl FilterStrategy {
    pub fn whitelist<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Whitelist(names.into_iter().map(Into::into).collect())
    }

    pub fn blacklist<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Blacklist(names.into_iter().map(Into::into).collect())
    }

    pub fn admits(&self, component: &str) -> bool {
        match self {
            Self::AdmitAll => true,
            Self::Whitelist(names) => names.contains(component),
            Self::Blacklist(names) => !names.contains(component),
        }
    }

    /// Names mentioned by the strategy, if any.
    pub fn named(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::AdmitAll => None,
            Self::Whitelist(names) | Self::Blacklist(names) => Some(names),
        }
    }
}

/// User-facing filter settings. At most one list may be given.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub whitelist: Option<Vec<String>>,
    pub blacklist: Option<Vec<String>>,
}

impl FilterConfig {
    pub fn with_whitelist<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.whitelist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_blacklist<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.blacklist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn into_strategy(self) -> HrResult<FilterStrategy> {
        match (self.whitelist, self.blacklist) {
            (Some(_), Some(_)) => Err(FilterError::Conflicting.into()),
            (Some(names), None) if names.is_empty() => Err(FilterError::EmptyList.into()),
            (Some(names), None) => Ok(FilterStrategy::whitelist(names)),
            (None, Some(names)) if names.is_empty() => Ok(FilterStrategy::AdmitAll),
            (None, Some(names)) => Ok(FilterStrategy::blacklist(names)),
            (None, None) => Ok(FilterStrategy::AdmitAll),
        }
    }
}

/// The registry as seen through a filter strategy.
pub struct Inventory<'a, P: Problem> {
    registry: &'a ComponentRegistry<P>,
    strategy: FilterStrategy,
}

impl<'a, P: Problem> Inventory<'a, P> {
    pub(crate) fn new(registry: &'a ComponentRegistry<P>, strategy: &FilterStrategy) -> HrResult<Self> {
        if let Some(names) = strategy.named() {
            if let Some(unknown) = names.iter().find(|n| !registry.contains(n)) {
                return Err(FilterError::UnknownComponent {
                    component: unknown.clone(),
                }
                .into());
            }
        }

        for name in registry.names().filter(|n| !strategy.admits(n)) {
            debug!("Component {} excluded by filter", name);
        }

        Ok(Self {
            registry,
            strategy: strategy.clone(),
        })
    }

    pub fn registry(&self) -> &'a ComponentRegistry<P> {
        self.registry
    }

    pub fn strategy(&self) -> &FilterStrategy {
        &self.strategy
    }

    pub fn is_admitted(&self, component: &str) -> bool {
        self.registry.contains(component) && self.strategy.admits(component)
    }

    /// Admitted implementations of `capability`, in registration order.
    pub fn lookup(&self, capability: Capability) -> Vec<&'a Arc<ComponentDescriptor<P>>> {
        self.registry
            .lookup(capability)
            .into_iter()
            .filter(|c| self.strategy.admits(c.name()))
            .collect()
    }

    pub fn admitted_count(&self) -> usize {
        self.registry
            .names()
            .filter(|n| self.strategy.admits(n))
            .count()
    }
}
