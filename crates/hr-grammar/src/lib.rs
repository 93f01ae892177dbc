//! Component catalogue and configuration space for Heurace.
//!
//! Components are registered explicitly at start-up, optionally filtered by a
//! whitelist or blacklist, and expanded into a [`Grammar`] from which
//! [`Configuration`]s are drawn and instantiated.

pub mod configuration;
pub mod filter;
pub mod grammar;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use configuration::{Configuration, ConfiguredComponent, ParameterValue, ProvidedContext};
pub use filter::{FilterConfig, FilterStrategy, Inventory};
pub use grammar::{ComponentNode, Domain, Grammar, GrammarBuilder, ParameterNode, TableRow};
pub use registry::{ComponentDescriptor, ComponentDescriptorBuilder, ComponentRegistry, ConstructorFn};
