//! `keel validate`

use anyhow::Result;
use colored::Colorize;

use super::project::Project;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let project = Project::load(ctx)?;
    let graph = project.graph()?;

    ui::success(&format!(
        "{} is valid: {} resources, {} references, {} exports",
        project.spec_path.display(),
        graph.len(),
        graph.edges().len(),
        graph.exports().len()
    ));

    if ctx.verbose > 0 {
        ui::header("Apply order");
        for (step, index) in graph.topological_order().into_iter().enumerate() {
            let node = &graph.nodes()[index];
            println!(
                "  {:>3}. {} {}",
                step + 1,
                node.name,
                format!("({})", node.kind).dimmed()
            );
        }
    }
    Ok(())
}
