//! Change planning - diffs desired resources against recorded state
//!
//! The planner never talks to a provider. It compares the desired graph
//! with the last-applied records and emits an ordered [`ChangeSet`]:
//! creates, updates and replacements in dependency order (producers first),
//! followed by deletes in reverse dependency order (dependents first).

use crate::diff::{AttrChange, creation_changes, diff_attributes, removal_changes};
use crate::error::PlanError;
use crate::expr::AttrRef;
use crate::graph::{Graph, ResolvedInputs, ResourceNode};
use crate::types::{ResourceKind, StateRecord};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// What an operation does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Kind changed under the same name: delete the old resource, create the new one
    Replace,
    Delete,
    NoOp,
}

impl Action {
    /// Whether the operation calls the provider
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Plan symbol, as shown in diffs
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
            Self::NoOp => " ",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        f.write_str(label)
    }
}

/// One step of a change set
#[derive(Debug, Clone)]
pub struct Operation {
    /// Logical resource name
    pub name: String,
    /// Kind being applied (the recorded kind for deletes)
    pub kind: ResourceKind,
    pub action: Action,
    /// Desired node; `None` for deletes
    pub node: Option<ResourceNode>,
    /// Last-applied record; `None` for creates
    pub prior: Option<StateRecord>,
    /// Attribute differences, sorted by name
    pub changes: Vec<AttrChange>,
    /// Indices of operations that must finish first
    pub after: Vec<usize>,
}

/// Ordered set of operations produced by [`plan`]
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    operations: Vec<Operation>,
}

/// Counts per action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub no_op: usize,
}

impl PlanSummary {
    /// Number of operations that call the provider
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

impl ChangeSet {
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Position of the operation for `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.operations.iter().position(|op| op.name == name)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for op in &self.operations {
            match op.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Replace => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::NoOp => summary.no_op += 1,
            }
        }
        summary
    }

    /// Check if any operation calls the provider
    pub fn has_changes(&self) -> bool {
        self.operations.iter().any(|op| op.action.is_change())
    }
}

/// Diff the desired graph against previous state
pub fn plan(desired: &Graph, previous: &BTreeMap<String, StateRecord>) -> Result<ChangeSet, PlanError> {
    let order = desired.topological_order();
    let mut actions: HashMap<&str, Action> = HashMap::new();
    let mut resolved: HashMap<&str, ResolvedInputs> = HashMap::new();
    let mut operations = Vec::with_capacity(order.len());
    let mut op_index: HashMap<String, usize> = HashMap::new();

    for &index in &order {
        let node = &desired.nodes()[index];
        let prior = previous.get(&node.name);

        let lookup = |r: &AttrRef| lookup_planned(desired, previous, &actions, &resolved, r);
        let inputs = node.resolve_inputs(&lookup);

        let (action, changes) = match prior {
            None => (Action::Create, creation_changes(&inputs.values, &inputs.pending)),
            Some(record) if record.kind != node.kind => {
                (Action::Replace, creation_changes(&inputs.values, &inputs.pending))
            }
            Some(record) => {
                let changes = diff_attributes(&record.inputs, &inputs.values, &inputs.pending);
                if changes.is_empty() {
                    (Action::NoOp, changes)
                } else {
                    (Action::Update, changes)
                }
            }
        };

        let after = desired
            .dependencies_of(index)
            .iter()
            .filter_map(|&dep| op_index.get(&desired.nodes()[dep].name).copied())
            .collect();

        log::debug!("Planned {} for '{}'", action, node.name);
        actions.insert(node.name.as_str(), action);
        resolved.insert(node.name.as_str(), inputs);
        op_index.insert(node.name.clone(), operations.len());
        operations.push(Operation {
            name: node.name.clone(),
            kind: node.kind,
            action,
            node: Some(node.clone()),
            prior: prior.cloned(),
            changes,
            after,
        });
    }

    let removed: BTreeSet<&str> = previous
        .keys()
        .map(String::as_str)
        .filter(|name| desired.node(name).is_none())
        .collect();

    // Kept resources are judged by the desired graph; their recorded
    // dependencies may predate a dropped reference or depends_on
    for name in &removed {
        for node in desired.nodes() {
            if !node.dependency_names().contains(name) {
                continue;
            }
            if actions.get(node.name.as_str()) == Some(&Action::NoOp) {
                return Err(PlanError::DependentStillPresent {
                    node: (*name).to_string(),
                    dependent: node.name.clone(),
                });
            }
        }
    }

    append_deletes(&mut operations, &mut op_index, previous, &removed);
    Ok(ChangeSet { operations })
}

/// Plan the removal of every recorded resource
pub fn plan_destroy(previous: &BTreeMap<String, StateRecord>) -> ChangeSet {
    let removed: BTreeSet<&str> = previous.keys().map(String::as_str).collect();
    let mut operations = Vec::with_capacity(removed.len());
    append_deletes(&mut operations, &mut HashMap::new(), previous, &removed);
    ChangeSet { operations }
}

/// Resolve a reference while planning
///
/// Producers that are unchanged resolve from their record. Producers being
/// created, updated or replaced have unknown outputs; their declared inputs
/// are still known.
fn lookup_planned(
    desired: &Graph,
    previous: &BTreeMap<String, StateRecord>,
    actions: &HashMap<&str, Action>,
    resolved: &HashMap<&str, ResolvedInputs>,
    reference: &AttrRef,
) -> Option<Value> {
    let producer = desired.node(&reference.node)?;
    match actions.get(reference.node.as_str()) {
        Some(Action::NoOp) => previous
            .get(&reference.node)
            .and_then(|record| record.attribute(&reference.attr))
            .cloned(),
        Some(_) if producer.kind.has_output(&reference.attr) => None,
        Some(_) => resolved
            .get(reference.node.as_str())
            .and_then(|inputs| inputs.values.get(&reference.attr))
            .cloned(),
        None => None,
    }
}

/// Append deletes for `removed`, dependents before their dependencies
fn append_deletes(
    operations: &mut Vec<Operation>,
    op_index: &mut HashMap<String, usize>,
    previous: &BTreeMap<String, StateRecord>,
    removed: &BTreeSet<&str>,
) {
    // Number of removed resources still depending on each removed resource
    let mut blocking: HashMap<&str, usize> = removed.iter().map(|name| (*name, 0)).collect();
    for name in removed {
        for dep in &previous[*name].dependencies {
            if let Some(count) = blocking.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }

    let mut ready: BTreeSet<&str> = blocking
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut ordered = Vec::with_capacity(removed.len());

    while let Some(name) = ready.pop_first() {
        ordered.push(name);
        for dep in &previous[name].dependencies {
            if let Some(count) = blocking.get_mut(dep.as_str()) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dep.as_str());
                }
            }
        }
    }

    // Records with cyclic recorded dependencies cannot be ordered; delete them last by name
    for name in removed {
        if !ordered.contains(name) {
            log::warn!("State records for '{}' form a dependency cycle", name);
            ordered.push(name);
        }
    }

    for name in ordered {
        let record = &previous[name];
        // Wait for every operation on a former dependent: its delete, or
        // the update that stops it referencing this resource
        let after = previous
            .iter()
            .filter(|(_, other)| other.dependencies.iter().any(|d| d == name))
            .filter_map(|(dependent, _)| op_index.get(dependent).copied())
            .collect();

        op_index.insert(name.to_string(), operations.len());
        operations.push(Operation {
            name: name.to_string(),
            kind: record.kind,
            action: Action::Delete,
            node: None,
            prior: Some(record.clone()),
            changes: removal_changes(&record.inputs),
            after,
        });
    }
}
