//! Explicit catalogue of configurable components.
//!
//! Every component is registered once at start-up together with its
//! parameter list and a single constructor function. Polymorphism over the
//! implementations of a capability is expressed by the capability traits in
//! `hr-types`; the registry only stores how to build them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hr_types::{
    Capability, Component, HrResult, ParameterBundle, ParameterDescriptor, Problem,
    RegistrationError,
};
use tracing::debug;

use crate::filter::{FilterStrategy, Inventory};

/// Builds a component from its resolved arguments.
pub type ConstructorFn<P> = Arc<dyn Fn(ParameterBundle<P>) -> HrResult<Component<P>> + Send + Sync>;

/// Immutable description of one configurable component.
pub struct ComponentDescriptor<P: Problem> {
    name: String,
    capability: Capability,
    parameters: Vec<ParameterDescriptor>,
    constructor: ConstructorFn<P>,
}

impl<P: Problem> ComponentDescriptor<P> {
    pub fn builder(name: impl Into<String>, capability: Capability) -> ComponentDescriptorBuilder<P> {
        ComponentDescriptorBuilder {
            name: name.into(),
            capability,
            parameters: Vec::new(),
            constructors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Invoke the designated constructor.
    pub fn construct(&self, bundle: ParameterBundle<P>) -> HrResult<Component<P>> {
        (self.constructor)(bundle)
    }

    fn same_signature(&self, other: &Self) -> bool {
        self.capability == other.capability && self.parameters == other.parameters
    }
}

impl<P: Problem> fmt::Debug for ComponentDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("name", &self.name)
            .field("capability", &self.capability)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Collects parameters and exactly one constructor for a descriptor.
pub struct ComponentDescriptorBuilder<P: Problem> {
    name: String,
    capability: Capability,
    parameters: Vec<ParameterDescriptor>,
    constructors: Vec<ConstructorFn<P>>,
}

impl<P: Problem> ComponentDescriptorBuilder<P> {
    pub fn param(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn constructor(
        mut self,
        constructor: impl Fn(ParameterBundle<P>) -> HrResult<Component<P>> + Send + Sync + 'static,
    ) -> Self {
        self.constructors.push(Arc::new(constructor));
        self
    }

    pub fn build(mut self) -> HrResult<ComponentDescriptor<P>> {
        let constructor = match self.constructors.len() {
            0 => {
                return Err(RegistrationError::MissingConstructor {
                    component: self.name,
                }
                .into())
            }
            1 => self.constructors.remove(0),
            count => {
                return Err(RegistrationError::MultipleConstructors {
                    component: self.name,
                    count,
                }
                .into())
            }
        };

        for (i, parameter) in self.parameters.iter().enumerate() {
            parameter
                .validate()
                .map_err(|message| RegistrationError::InvalidParameter {
                    component: self.name.clone(),
                    parameter: parameter.name.clone(),
                    message,
                })?;
            if self.parameters[..i].iter().any(|p| p.name == parameter.name) {
                return Err(RegistrationError::InvalidParameter {
                    component: self.name.clone(),
                    parameter: parameter.name.clone(),
                    message: "declared twice".to_string(),
                }
                .into());
            }
        }

        Ok(ComponentDescriptor {
            name: self.name,
            capability: self.capability,
            parameters: self.parameters,
            constructor,
        })
    }
}

/// All registered components, in registration order.
pub struct ComponentRegistry<P: Problem> {
    components: Vec<Arc<ComponentDescriptor<P>>>,
    by_name: HashMap<String, usize>,
}

impl<P: Problem> Default for ComponentRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Problem> fmt::Debug for ComponentRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.components.iter().map(|c| (c.name(), c.capability())))
            .finish()
    }
}

impl<P: Problem> ComponentRegistry<P> {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ComponentDescriptor<P>) -> HrResult<()> {
        if let Some(&index) = self.by_name.get(descriptor.name()) {
            let existing = &self.components[index];
            let error = if existing.same_signature(&descriptor) {
                RegistrationError::Ambiguous {
                    component: descriptor.name().to_string(),
                    capability: descriptor.capability().to_string(),
                }
            } else {
                RegistrationError::DuplicateName {
                    component: descriptor.name().to_string(),
                }
            };
            return Err(error.into());
        }

        debug!(
            "Registering component {} as {} with {} parameters",
            descriptor.name(),
            descriptor.capability(),
            descriptor.parameters().len()
        );
        self.by_name
            .insert(descriptor.name().to_string(), self.components.len());
        self.components.push(Arc::new(descriptor));
        Ok(())
    }

    /// Build and register in one step.
    pub fn register_with(&mut self, builder: ComponentDescriptorBuilder<P>) -> HrResult<()> {
        self.register(builder.build()?)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ComponentDescriptor<P>>> {
        self.by_name.get(name).map(|&i| &self.components[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Every implementation of `capability`, in registration order.
    pub fn lookup(&self, capability: Capability) -> Vec<&Arc<ComponentDescriptor<P>>> {
        self.components
            .iter()
            .filter(|c| c.capability() == capability)
            .collect()
    }

    /// Position of a component in registration order.
    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Apply a filter strategy, validating that it only names known components.
    pub fn inventory(&self, filter: &FilterStrategy) -> HrResult<Inventory<'_, P>> {
        Inventory::new(self, filter)
    }
}
