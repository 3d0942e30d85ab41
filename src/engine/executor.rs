//! Apply orchestration with terminal UI

use anyhow::Result;
use colored::Colorize;
use declarative::{
    ApplyOptions, ApplyResult, ChangeSet, OpStatus, Operation, ProgressCallback, Provider,
    StateStore,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use super::differ::display_change_set;
use crate::ui;

/// Options for an interactive apply
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Options passed to the engine
    pub apply: ApplyOptions,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Show the plan without applying it
    pub dry_run: bool,
    /// Suppress the progress bar
    pub quiet: bool,
    /// Word used in prompts and summaries, "Apply" when empty
    pub verb: &'static str,
}

/// Outcome of [`execute`]
#[derive(Debug)]
pub enum Execution {
    /// Nothing to do
    NoChanges,
    /// Dry run, or the user declined
    NotApplied,
    Applied(ApplyResult),
}

/// Show the plan, confirm and apply it
pub fn execute(
    change_set: ChangeSet,
    provider: Arc<dyn Provider>,
    state: Arc<dyn StateStore>,
    opts: &ExecuteOptions,
) -> Result<Execution> {
    display_change_set(&change_set, false);

    if !change_set.has_changes() {
        return Ok(Execution::NoChanges);
    }

    if opts.dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(Execution::NotApplied);
    }

    let verb = if opts.verb.is_empty() { "Apply" } else { opts.verb };

    if !opts.yes && !confirm_proceed(verb)? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(Execution::NotApplied);
    }

    println!();
    println!(
        "  {} Applying {} changes with {} workers...",
        "→".cyan(),
        change_set.summary().total_changes(),
        opts.apply.jobs
    );

    let mut progress = BarProgress::new(opts.quiet);
    let result = declarative::apply_with_progress(change_set, provider, state, &opts.apply, &mut progress);

    print_summary(verb, &result);
    Ok(Execution::Applied(result))
}

/// Confirm with user
fn confirm_proceed(verb: &str) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(format!("{verb} these changes?"))
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Progress bar over the operations that call the provider
struct BarProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{line}")),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&mut self, changes: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new(changes as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        self.bar = Some(bar);
    }

    fn on_operation_start(&mut self, op: &Operation) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {}", op.action, op.name));
        }
    }

    fn on_operation_complete(&mut self, op: &Operation, status: &OpStatus) {
        if !op.action.is_change() {
            return;
        }
        let line = match status {
            OpStatus::Succeeded { change } => {
                format!("    {} {} {}", "✓".green(), op.name, format!("{change:?}").dimmed())
            }
            OpStatus::Failed { reason } => {
                format!("    {} {} {}", "✗".red(), op.name, reason.red())
            }
            OpStatus::Skipped { reason } => {
                format!("    {} {} {}", "⊘".yellow(), op.name, reason.dimmed())
            }
        };
        self.println(line);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Print final summary
fn print_summary(verb: &str, result: &ApplyResult) {
    let summary = result.summary();

    println!();
    if result.is_success() {
        println!(
            "  {} {verb} complete in {}",
            "✓".green().bold(),
            ui::format_duration(result.duration)
        );
    } else {
        println!(
            "  {} {verb} finished with errors in {}",
            "⚠".yellow().bold(),
            ui::format_duration(result.duration)
        );
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }

    let problems = outcome_lines(result);
    if !problems.is_empty() {
        println!();
        for line in problems {
            ui::dim(&line);
        }
    }
}

/// One line per failed or skipped resource, failures first
fn outcome_lines(result: &ApplyResult) -> Vec<String> {
    result
        .failed()
        .chain(result.skipped())
        .map(|r| match &r.status {
            OpStatus::Failed { reason } => format!("failed   {} ({}): {}", r.name, r.kind, reason),
            OpStatus::Skipped { reason } => format!("skipped  {} ({}): {}", r.name, r.kind, reason),
            OpStatus::Succeeded { .. } => format!("ok       {} ({})", r.name, r.kind),
        })
        .collect()
}
