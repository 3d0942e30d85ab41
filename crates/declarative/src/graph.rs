//! Resource graph builder
//!
//! Turns a [`GraphSpec`] document into an immutable DAG of resource nodes.
//! Every reference is checked against its producer, and cycles are rejected
//! before anything else sees the graph.

use crate::error::GraphError;
use crate::expr::{AttrRef, Expr};
use crate::types::{Attributes, ResourceKind, StateRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Declarative document describing the desired resources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Resources in declaration order
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,
    /// Named values to report after apply, e.g. public URLs
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
}

/// One declared resource, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Ordering-only dependencies with no attribute wiring
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A validated resource in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub name: String,
    pub kind: ResourceKind,
    pub inputs: BTreeMap<String, Expr>,
    pub depends_on: Vec<String>,
    /// Position in the source document, used as the ordering tie-break
    pub index: usize,
}

/// Inputs resolved as far as currently possible
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    /// Attributes whose value is known
    pub values: Attributes,
    /// Attributes still waiting on a producer
    pub pending: Vec<String>,
}

impl ResolvedInputs {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

impl ResourceNode {
    /// Names of every resource this one depends on
    pub fn dependency_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self
            .inputs
            .values()
            .flat_map(|expr| expr.references())
            .map(|r| r.node.as_str())
            .collect();
        names.extend(self.depends_on.iter().map(String::as_str));
        names
    }

    /// Resolve inputs using `lookup` for referenced attributes
    pub fn resolve_inputs(&self, lookup: &dyn Fn(&AttrRef) -> Option<Value>) -> ResolvedInputs {
        let mut resolved = ResolvedInputs::default();
        for (attr, expr) in &self.inputs {
            match expr.resolve(lookup) {
                Some(value) => {
                    resolved.values.insert(attr.clone(), value);
                }
                None => resolved.pending.push(attr.clone()),
            }
        }
        resolved
    }
}

/// Directed edge from a producer attribute to a consumer attribute
///
/// `depends_on` edges carry no attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub from_attr: Option<String>,
    pub to: String,
    pub to_attr: Option<String>,
}

/// Immutable, acyclic resource graph
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    exports: BTreeMap<String, Expr>,
}

impl Graph {
    /// Validate a spec document and build the graph
    pub fn build(spec: &GraphSpec) -> Result<Self, GraphError> {
        let mut nodes = Vec::with_capacity(spec.resources.len());
        let mut index = HashMap::new();

        for (position, resource) in spec.resources.iter().enumerate() {
            validate_name(&resource.name)?;
            if index.insert(resource.name.clone(), position).is_some() {
                return Err(GraphError::schema(
                    &resource.name,
                    "resource name declared more than once",
                ));
            }

            let mut inputs = BTreeMap::new();
            for (attr, raw) in &resource.inputs {
                let expr = Expr::parse(raw)
                    .map_err(|message| GraphError::schema(&resource.name, message))?;
                inputs.insert(attr.clone(), expr);
            }

            nodes.push(ResourceNode {
                name: resource.name.clone(),
                kind: resource.kind,
                inputs,
                depends_on: resource.depends_on.clone(),
                index: position,
            });
        }

        let mut edges = Vec::new();
        let mut dependencies = vec![BTreeSet::new(); nodes.len()];
        let mut dependents = vec![BTreeSet::new(); nodes.len()];

        for (consumer, node) in nodes.iter().enumerate() {
            for (attr, expr) in &node.inputs {
                for reference in expr.references() {
                    let producer = check_reference(&nodes, &index, &node.name, reference)?;
                    dependencies[consumer].insert(producer);
                    dependents[producer].insert(consumer);
                    edges.push(Edge {
                        from: reference.node.clone(),
                        from_attr: Some(reference.attr.clone()),
                        to: node.name.clone(),
                        to_attr: Some(attr.clone()),
                    });
                }
            }

            for name in &node.depends_on {
                if name == &node.name {
                    return Err(GraphError::schema(&node.name, "resource cannot depend on itself"));
                }
                let producer = *index.get(name).ok_or_else(|| {
                    GraphError::schema(&node.name, format!("depends_on names unknown resource '{name}'"))
                })?;
                dependencies[consumer].insert(producer);
                dependents[producer].insert(consumer);
                edges.push(Edge {
                    from: name.clone(),
                    from_attr: None,
                    to: node.name.clone(),
                    to_attr: None,
                });
            }
        }

        let mut exports = BTreeMap::new();
        for (name, raw) in &spec.exports {
            let expr = Expr::parse(raw)
                .map_err(|message| GraphError::schema(format!("exports.{name}"), message))?;
            for reference in expr.references() {
                check_reference(&nodes, &index, &format!("exports.{name}"), reference)?;
            }
            exports.insert(name.clone(), expr);
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            return Err(GraphError::CyclicDependency {
                cycle: cycle.into_iter().map(|i| nodes[i].name.clone()).collect(),
            });
        }

        log::debug!(
            "Built resource graph: {} nodes, {} edges",
            nodes.len(),
            edges.len()
        );

        Ok(Self {
            nodes,
            index,
            edges,
            dependencies,
            dependents,
            exports,
        })
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Look up a node by logical name
    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Declaration index of a node
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Direct producers of the node at `index`
    pub fn dependencies_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependencies[index]
    }

    /// Direct consumers of the node at `index`
    pub fn dependents_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependents[index]
    }

    /// Export expressions by name
    pub fn exports(&self) -> &BTreeMap<String, Expr> {
        &self.exports
    }

    /// Evaluate exports against recorded state
    ///
    /// An export is `None` while any resource it references has no record.
    pub fn resolve_exports(&self, records: &BTreeMap<String, StateRecord>) -> BTreeMap<String, Option<Value>> {
        let lookup = |r: &AttrRef| {
            records
                .get(&r.node)
                .and_then(|record| record.attribute(&r.attr))
                .cloned()
        };
        self.exports
            .iter()
            .map(|(name, expr)| (name.clone(), expr.resolve(&lookup)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node indices with producers before consumers
    ///
    /// Nodes with no ordering constraint between them keep declaration order.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &self.dependents[next] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        order
    }
}

fn validate_name(name: &str) -> Result<(), GraphError> {
    if name.is_empty() {
        return Err(GraphError::schema(name, "resource name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(GraphError::schema(
            name,
            "resource names may only contain letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

/// Check that a reference names an existing producer attribute
fn check_reference(
    nodes: &[ResourceNode],
    index: &HashMap<String, usize>,
    consumer: &str,
    reference: &AttrRef,
) -> Result<usize, GraphError> {
    let unresolved = || GraphError::UnresolvedReference {
        node: consumer.to_string(),
        reference: reference.to_string(),
    };
    let producer = *index.get(&reference.node).ok_or_else(unresolved)?;
    let node = &nodes[producer];
    if node.kind.has_output(&reference.attr) || node.inputs.contains_key(&reference.attr) {
        Ok(producer)
    } else {
        Err(unresolved())
    }
}

/// Depth-first search for a cycle, following dependency edges
///
/// Returns the cycle as node indices with the first node repeated at the end.
fn find_cycle(dependencies: &[BTreeSet<usize>]) -> Option<Vec<usize>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn visit(
        node: usize,
        dependencies: &[BTreeSet<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        path.push(node);
        for &next in &dependencies[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, dependencies, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; dependencies.len()];
    let mut path = Vec::new();
    for start in 0..dependencies.len() {
        if marks[start] == Mark::Unvisited
            && let Some(cycle) = visit(start, dependencies, &mut marks, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}
