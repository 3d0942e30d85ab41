//! `keel refresh`

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::RefreshOutcome;

use super::project::Project;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let project = Project::load(ctx)?;
    if !ctx.quiet {
        ui::header(&format!("Refresh {}", project.title()));
    }

    let outcomes = refresh_project(&project)?;
    if outcomes.is_empty() {
        ui::info("No resources recorded for this stack");
        return Ok(());
    }

    let mut failed = 0;
    for (name, outcome) in &outcomes {
        match outcome {
            RefreshOutcome::InSync => {
                if !ctx.quiet {
                    println!("  {} {}", "✓".green(), name);
                }
            }
            RefreshOutcome::Updated => {
                println!("  {} {} {}", "~".yellow(), name, "outputs updated".dimmed());
            }
            RefreshOutcome::Removed => {
                println!("  {} {} {}", "-".red(), name, "no longer exists".dimmed());
            }
            RefreshOutcome::Failed { reason } => {
                failed += 1;
                println!("  {} {} {}", "✗".red(), name, reason.red());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} resources could not be refreshed");
    }
    Ok(())
}

pub fn refresh_project(project: &Project) -> Result<Vec<(String, RefreshOutcome)>> {
    let state = project.state();
    let provider = project.provider()?;
    Ok(declarative::refresh(&state, &provider, &project.config.retry_config())?)
}
