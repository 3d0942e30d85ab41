//! `keel apply` and `keel destroy`

use anyhow::{Result, bail};
use declarative::{ApplyResult, ChangeSet, StateStore, plan, plan_destroy};
use std::sync::Arc;

use super::outputs::print_exports;
use super::project::Project;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::engine::{ExecuteOptions, Execution, execute};
use crate::ui;

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let project = Project::load(ctx)?;
    if !ctx.quiet {
        ui::header(&format!("Apply {}", project.title()));
    }

    let execution = apply_project(&project, args, ctx.quiet)?;
    if !matches!(execution, Execution::NotApplied) && !ctx.quiet {
        let graph = project.graph()?;
        let exports = graph.resolve_exports(&project.records()?);
        if !exports.is_empty() {
            println!();
            print_exports(&exports);
        }
    }
    check(&execution)
}

pub fn destroy(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let project = Project::load(ctx)?;
    if !ctx.quiet {
        ui::header(&format!("Destroy {}", project.title()));
    }

    let execution = destroy_project(&project, args, ctx.quiet)?;
    check(&execution)?;

    let orphans = project.provider()?.len();
    if orphans > 0 {
        ui::warn(&format!(
            "{orphans} resources remain on the local provider with no state record"
        ));
    }
    Ok(())
}

/// Plan against recorded state and apply the result
pub fn apply_project(project: &Project, args: &ApplyArgs, quiet: bool) -> Result<Execution> {
    let graph = project.graph()?;
    let change_set = plan(&graph, &project.records()?)?;
    run_change_set(project, change_set, args, quiet, "Apply")
}

/// Delete every recorded resource, dependents first
pub fn destroy_project(project: &Project, args: &ApplyArgs, quiet: bool) -> Result<Execution> {
    let change_set = plan_destroy(&project.records()?);
    run_change_set(project, change_set, args, quiet, "Destroy")
}

fn run_change_set(
    project: &Project,
    change_set: ChangeSet,
    args: &ApplyArgs,
    quiet: bool,
    verb: &'static str,
) -> Result<Execution> {
    let state: Arc<dyn StateStore> = Arc::new(project.state());
    let provider = Arc::new(project.provider()?);

    let opts = ExecuteOptions {
        apply: project.apply_options(args),
        yes: args.yes,
        dry_run: args.dry_run,
        quiet,
        verb,
    };
    execute(change_set, provider, state, &opts)
}

/// Nonzero exit when any operation failed or was skipped
fn check(execution: &Execution) -> Result<()> {
    match execution {
        Execution::Applied(result) if !result.is_success() => bail!(failure_message(result)),
        _ => Ok(()),
    }
}

fn failure_message(result: &ApplyResult) -> String {
    let summary = result.summary();
    format!(
        "{} operations failed, {} skipped",
        summary.failed, summary.skipped
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::project::test_project;
    use crate::paths;
    use std::fs;
    use std::path::Path;

    const DOCUMENT: &str = r#"
[[resource]]
name = "repo"
kind = "registry"
inputs = { name = "frontend" }

[[resource]]
name = "image"
kind = "image"
inputs = { image_name = "${repo.repository_url}:latest" }

[[resource]]
name = "lb"
kind = "load_balancer"
inputs = { name = "at-lb-001", internal = false }

[exports]
external_url = "${lb.dns_name}"
fe_image_url = "${image.image_name}"
"#;

    fn yes() -> ApplyArgs {
        ApplyArgs {
            jobs: Some(2),
            fail_fast: false,
            yes: true,
            dry_run: false,
        }
    }

    fn applied(execution: Execution) -> ApplyResult {
        match execution {
            Execution::Applied(result) => result,
            other => panic!("expected an apply, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_then_reapply_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let project = test_project(dir.path(), DOCUMENT);

        let result = applied(apply_project(&project, &yes(), true).unwrap());
        assert!(result.is_success());
        assert_eq!(result.summary().created, 3);

        let records = project.records().unwrap();
        let exports = project.graph().unwrap().resolve_exports(&records);
        let image = exports["fe_image_url"].as_ref().unwrap().as_str().unwrap();
        assert!(image.ends_with(".registry.local/frontend:latest"));
        assert!(exports["external_url"].is_some());

        let again = apply_project(&project, &yes(), true).unwrap();
        assert!(matches!(again, Execution::NoChanges));
    }

    #[test]
    fn test_destroy_empties_stack() {
        let dir = tempfile::tempdir().unwrap();
        let project = test_project(dir.path(), DOCUMENT);
        apply_project(&project, &yes(), true).unwrap();

        let result = applied(destroy_project(&project, &yes(), true).unwrap());

        assert!(result.is_success());
        assert_eq!(result.summary().deleted, 3);
        assert!(project.records().unwrap().is_empty());
        assert_eq!(project.provider().unwrap().len(), 0);
    }

    #[test]
    fn test_dry_run_leaves_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let project = test_project(dir.path(), DOCUMENT);
        let args = ApplyArgs {
            dry_run: true,
            ..yes()
        };

        let execution = apply_project(&project, &args, true).unwrap();

        assert!(matches!(execution, Execution::NotApplied));
        assert!(project.records().unwrap().is_empty());
    }

    #[test]
    fn test_failed_update_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let project = test_project(dir.path(), DOCUMENT);
        apply_project(&project, &yes(), true).unwrap();

        // Lose the remote side, then change an input
        fs::remove_file(paths::cloud_file(&project.stack_dir)).unwrap();
        fs::write(
            &project.spec_path,
            DOCUMENT.replace("internal = false", "internal = true"),
        )
        .unwrap();

        let execution = apply_project(&project, &yes(), true).unwrap();
        let err = check(&execution).unwrap_err();
        assert_eq!(err.to_string(), "1 operations failed, 0 skipped");
    }

    #[test]
    fn test_demo_stack_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let document =
            fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/airtek/stack.toml"))
                .unwrap();
        let project = test_project(dir.path(), &document);
        let args = ApplyArgs {
            jobs: Some(4),
            ..yes()
        };

        let result = applied(apply_project(&project, &args, true).unwrap());
        assert!(result.is_success());
        assert_eq!(result.summary().created, 21);

        let exports = project.graph().unwrap().resolve_exports(&project.records().unwrap());
        assert!(exports.values().all(Option::is_some));

        let result = applied(destroy_project(&project, &args, true).unwrap());
        assert!(result.is_success());
        assert_eq!(project.provider().unwrap().len(), 0);
    }
}
