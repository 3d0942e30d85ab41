//! `keel plan`

use anyhow::Result;
use declarative::{ChangeSet, plan};
use serde_json::{Value, json};

use super::project::Project;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::differ::display_change_set;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let project = Project::load(ctx)?;
    let change_set = build(&project)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&change_set))?);
        return Ok(());
    }

    if !ctx.quiet {
        ui::header(&format!("Plan for {}", project.title()));
    }
    display_change_set(&change_set, args.all);
    Ok(())
}

/// Diff the resource document against recorded state
pub fn build(project: &Project) -> Result<ChangeSet> {
    let graph = project.graph()?;
    let records = project.records()?;
    Ok(plan(&graph, &records)?)
}

/// Machine-readable plan
pub fn to_json(change_set: &ChangeSet) -> Value {
    let operations: Vec<Value> = change_set
        .operations()
        .iter()
        .map(|op| {
            json!({
                "name": op.name,
                "kind": op.kind,
                "action": op.action,
                "id": op.prior.as_ref().map(|prior| prior.id.clone()),
                "changes": op.changes,
            })
        })
        .collect();

    json!({
        "summary": change_set.summary(),
        "operations": operations,
    })
}
