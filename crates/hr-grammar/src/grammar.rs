//! Expansion of the filtered registry into a finite configuration tree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use hr_types::{
    validation_error, Capability, DeclaredType, GrammarError, HrResult, ParameterDescriptor,
    ParameterKind, Problem, ProvidedKind,
};
use tracing::{debug, info};

use crate::configuration::{ConfiguredComponent, ParameterValue};
use crate::filter::Inventory;
use crate::registry::ComponentDescriptor;

/// The closed-form domain of one parameter inside the grammar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Domain {
    Integer { min: i64, max: i64, step: i64 },
    Real { min: f64, max: f64, log: bool },
    Categorical(Vec<serde_json::Value>),
    Ordinal(Vec<serde_json::Value>),
    /// Choice among the admitted implementations of a capability.
    Nested {
        capability: Capability,
        alternatives: Vec<ComponentNode>,
    },
    /// Resolved from the execution context at instantiation time.
    Provided {
        kind: ProvidedKind,
        declared: DeclaredType,
    },
}

impl Domain {
    pub fn is_searchable(&self) -> bool {
        !matches!(self, Self::Provided { .. })
    }

    /// Number of distinct values, `None` for continuous domains.
    pub fn size(&self) -> Option<u128> {
        match self {
            Self::Integer { min, max, step } => Some(integer_slots(*min, *max, *step)),
            Self::Real { min, max, .. } if min == max => Some(1),
            Self::Real { .. } => None,
            Self::Categorical(values) | Self::Ordinal(values) => Some(values.len() as u128),
            Self::Nested { alternatives, .. } => alternatives
                .iter()
                .try_fold(0u128, |acc, node| acc.checked_add(node.space_size()?)),
            Self::Provided { .. } => Some(1),
        }
    }
}

/// Number of values `min, min + step, ..` up to `max`, computed without
/// overflow over the whole `i64` range.
pub fn integer_slots(min: i64, max: i64, step: i64) -> u128 {
    let span = i128::from(max) - i128::from(min);
    if span < 0 || step < 1 {
        return 0;
    }
    (span / i128::from(step)) as u128 + 1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNode {
    pub name: String,
    pub domain: Domain,
}

/// One component choice together with the expanded domains of its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub component: String,
    pub capability: Capability,
    pub parameters: Vec<ParameterNode>,
}

impl ComponentNode {
    pub fn parameter(&self, name: &str) -> Option<&ParameterNode> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Configurations rooted at this node, `None` if continuous or too large.
    pub fn space_size(&self) -> Option<u128> {
        self.parameters
            .iter()
            .try_fold(1u128, |acc, p| acc.checked_mul(p.domain.size()?))
    }

    fn nested(&self) -> impl Iterator<Item = &ComponentNode> {
        self.parameters.iter().flat_map(|p| match &p.domain {
            Domain::Nested { alternatives, .. } => alternatives.as_slice(),
            _ => &[],
        })
    }

    fn count_nodes(&self) -> usize {
        1 + self.nested().map(ComponentNode::count_nodes).sum::<usize>()
    }

    fn collect_names(&self, out: &mut BTreeSet<String>) {
        out.insert(self.component.clone());
        for child in self.nested() {
            child.collect_names(out);
        }
    }
}

/// The full configuration space, rooted at one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    root: Capability,
    roots: Vec<ComponentNode>,
}

impl Grammar {
    pub fn root(&self) -> Capability {
        self.root
    }

    /// Alternatives for the root capability, in registration order.
    pub fn roots(&self) -> &[ComponentNode] {
        &self.roots
    }

    pub fn root_node(&self, component: &str) -> Option<&ComponentNode> {
        self.roots.iter().find(|n| n.component == component)
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(ComponentNode::count_nodes).sum()
    }

    /// Every component reachable from the root.
    pub fn components(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for node in &self.roots {
            node.collect_names(&mut names);
        }
        names
    }

    pub fn references(&self, component: &str) -> bool {
        self.components().contains(component)
    }

    /// Total number of distinct configurations.
    ///
    /// Returns `None` when any reachable real domain is continuous or the
    /// count overflows.
    pub fn space_size(&self) -> Option<u128> {
        self.roots
            .iter()
            .try_fold(0u128, |acc, node| acc.checked_add(node.space_size()?))
    }

    /// Flattened listing of every searchable parameter, parents before children.
    pub fn parameter_table(&self) -> Vec<TableRow> {
        let mut rows = Vec::new();
        let root_name = self.root.as_str().to_string();
        rows.push(TableRow {
            name: root_name.clone(),
            switch: format!("--{root_name}="),
            kind: "c".to_string(),
            domain: choice_list(&self.roots),
            condition: None,
        });
        for node in &self.roots {
            flatten(node, &root_name, &mut rows);
        }
        rows
    }

    /// Verify that a configuration is a path through this grammar.
    pub fn check(&self, root: &ConfiguredComponent) -> HrResult<()> {
        let node = self.root_node(&root.component).ok_or_else(|| {
            validation_error!("{} is not an alternative for {}", root.component, self.root)
        })?;
        check_node(node, root).map_err(|message| validation_error!("{message}"))
    }

    /// The parameter table in irace's text format.
    pub fn render_parameter_table(&self) -> String {
        self.parameter_table()
            .iter()
            .map(|row| format!("{row}\n"))
            .collect()
    }
}

/// One line of the flattened parameter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub name: String,
    pub switch: String,
    /// `c`, `i`, `r`, `r,log` or `o`.
    pub kind: String,
    pub domain: String,
    /// Parent choice parameter and the value enabling this one.
    pub condition: Option<(String, String)>,
}

impl fmt::Display for TableRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" {} ({})", self.name, self.switch, self.kind, self.domain)?;
        if let Some((parent, value)) = &self.condition {
            write!(f, " | {parent} == \"{value}\"")?;
        }
        Ok(())
    }
}

fn check_node(node: &ComponentNode, configured: &ConfiguredComponent) -> Result<(), String> {
    if configured.params.len() != node.parameters.len() {
        return Err(format!(
            "{} expects {} parameters, got {}",
            node.component,
            node.parameters.len(),
            configured.params.len()
        ));
    }

    for parameter in &node.parameters {
        let value = configured
            .params
            .get(&parameter.name)
            .ok_or_else(|| format!("{}.{} is not bound", node.component, parameter.name))?;
        let fits = match (&parameter.domain, value) {
            (Domain::Integer { min, max, step }, ParameterValue::Int(v)) => {
                v >= min && v <= max && (i128::from(*v) - i128::from(*min)) % i128::from(*step) == 0
            }
            (Domain::Real { min, max, .. }, ParameterValue::Float(v)) => v >= min && v <= max,
            (Domain::Categorical(values) | Domain::Ordinal(values), v) => values
                .iter()
                .any(|choice| ParameterValue::from_choice(choice) == *v),
            (Domain::Nested { alternatives, .. }, ParameterValue::Component(nested)) => {
                match alternatives.iter().find(|a| a.component == nested.component) {
                    Some(child) => {
                        check_node(child, nested)?;
                        true
                    }
                    None => false,
                }
            }
            (Domain::Provided { kind, .. }, ParameterValue::Provided(bound)) => kind == bound,
            _ => false,
        };
        if !fits {
            return Err(format!(
                "{}.{} = {} is outside its domain",
                node.component, parameter.name, value
            ));
        }
    }
    Ok(())
}

fn choice_list(alternatives: &[ComponentNode]) -> String {
    alternatives
        .iter()
        .map(|n| n.component.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn json_list(values: &[serde_json::Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn flatten(node: &ComponentNode, parent: &str, rows: &mut Vec<TableRow>) {
    for parameter in &node.parameters {
        let name = format!("{parent}_{}_{}", node.component, parameter.name);
        let (kind, domain) = match &parameter.domain {
            Domain::Integer { min, max, step: 1 } => ("i", format!("{min}, {max}")),
            Domain::Integer { min, max, step } => {
                let (min, step) = (i128::from(*min), i128::from(*step));
                let values: Vec<String> = (0..=(i128::from(*max) - min) / step)
                    .map(|i| (min + i * step).to_string())
                    .collect();
                ("o", values.join(", "))
            }
            Domain::Real { min, max, log: false } => ("r", format!("{min}, {max}")),
            Domain::Real { min, max, log: true } => ("r,log", format!("{min}, {max}")),
            Domain::Categorical(values) => ("c", json_list(values)),
            Domain::Ordinal(values) => ("o", json_list(values)),
            Domain::Nested { alternatives, .. } => ("c", choice_list(alternatives)),
            Domain::Provided { .. } => continue,
        };
        rows.push(TableRow {
            switch: format!("--{name}="),
            name: name.clone(),
            kind: kind.to_string(),
            domain,
            condition: Some((parent.to_string(), node.component.clone())),
        });

        if let Domain::Nested { alternatives, .. } = &parameter.domain {
            for child in alternatives {
                flatten(child, &name, rows);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Grammar`] from an [`Inventory`].
#[derive(Debug, Clone)]
pub struct GrammarBuilder {
    root: Capability,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Capabilities on the current expansion path and the hops that led there.
struct ExpansionPath {
    capabilities: HashSet<Capability>,
    hops: Vec<String>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self {
            root: Capability::Algorithm,
        }
    }

    pub fn with_root(mut self, root: Capability) -> Self {
        self.root = root;
        self
    }

    pub fn build<P: Problem>(&self, inventory: &Inventory<'_, P>) -> HrResult<Grammar> {
        let mut path = ExpansionPath {
            capabilities: HashSet::from([self.root]),
            hops: vec![self.root.to_string()],
        };
        let roots = expand_capability(inventory, self.root, &mut path)?;
        if roots.is_empty() {
            return Err(GrammarError::Empty {
                capability: self.root.to_string(),
            }
            .into());
        }

        let grammar = Grammar {
            root: self.root,
            roots,
        };
        info!(
            "Built grammar rooted at {} with {} alternatives and {} nodes",
            grammar.root,
            grammar.roots.len(),
            grammar.node_count()
        );
        Ok(grammar)
    }
}

fn expand_capability<P: Problem>(
    inventory: &Inventory<'_, P>,
    capability: Capability,
    path: &mut ExpansionPath,
) -> HrResult<Vec<ComponentNode>> {
    let mut nodes = Vec::new();
    for descriptor in inventory.lookup(capability) {
        match expand_component(inventory, descriptor, path)? {
            Some(node) => nodes.push(node),
            None => debug!(
                "Component {} pruned: a nested parameter has no admitted implementation",
                descriptor.name()
            ),
        }
    }
    Ok(nodes)
}

fn expand_component<P: Problem>(
    inventory: &Inventory<'_, P>,
    descriptor: &ComponentDescriptor<P>,
    path: &mut ExpansionPath,
) -> HrResult<Option<ComponentNode>> {
    let mut parameters = Vec::with_capacity(descriptor.parameters().len());
    let mut unsatisfiable = false;

    for parameter in descriptor.parameters() {
        let domain = match &parameter.kind {
            ParameterKind::Nested(capability) => {
                let hop = format!("{}.{} -> {}", descriptor.name(), parameter.name, capability);
                if path.capabilities.contains(capability) {
                    let mut chain = path.hops.clone();
                    chain.push(hop);
                    return Err(GrammarError::Cycle { chain }.into());
                }

                path.capabilities.insert(*capability);
                path.hops.push(hop);
                let alternatives = expand_capability(inventory, *capability, path);
                path.hops.pop();
                path.capabilities.remove(capability);

                let alternatives = alternatives?;
                if alternatives.is_empty() {
                    unsatisfiable = true;
                }
                Domain::Nested {
                    capability: *capability,
                    alternatives,
                }
            }
            ParameterKind::Provided(kind) => check_binding(descriptor.name(), parameter, *kind)?,
            leaf => leaf_domain(leaf)
                .ok_or_else(|| hr_types::internal_error!("{} is not a leaf domain", parameter.name))?,
        };
        parameters.push(ParameterNode {
            name: parameter.name.clone(),
            domain,
        });
    }

    if unsatisfiable {
        return Ok(None);
    }
    Ok(Some(ComponentNode {
        component: descriptor.name().to_string(),
        capability: descriptor.capability(),
        parameters,
    }))
}

fn check_binding(component: &str, parameter: &ParameterDescriptor, kind: ProvidedKind) -> HrResult<Domain> {
    if !kind.can_bind(parameter.declared) {
        return Err(GrammarError::Binding {
            component: component.to_string(),
            parameter: parameter.name.clone(),
            provided: kind.to_string(),
            declared: parameter.declared.to_string(),
        }
        .into());
    }
    Ok(Domain::Provided {
        kind,
        declared: parameter.declared,
    })
}

fn leaf_domain(kind: &ParameterKind) -> Option<Domain> {
    let domain = match kind {
        ParameterKind::Integer { min, max, step } => Domain::Integer {
            min: *min,
            max: *max,
            step: *step,
        },
        ParameterKind::Real { min, max, log } => Domain::Real {
            min: *min,
            max: *max,
            log: *log,
        },
        ParameterKind::Categorical { values } => Domain::Categorical(values.clone()),
        ParameterKind::Ordinal { values } => Domain::Ordinal(values.clone()),
        ParameterKind::Nested(_) | ParameterKind::Provided(_) => return None,
    };
    Some(domain)
}
