//! Change set display

use colored::{ColoredString, Colorize};
use declarative::{Action, AttrChange, ChangeSet, PlanSummary};
use serde_json::Value;

use crate::ui;

const VALUE_WIDTH: usize = 60;

fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "  +".green(),
        Action::Update => "  ~".yellow(),
        Action::Replace => "-/+".magenta(),
        Action::Delete => "  -".red(),
        Action::NoOp => "   ".normal(),
    }
}

/// Compact one-line rendering of an attribute value
pub fn format_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    };
    ui::truncate(&text, VALUE_WIDTH)
}

/// One line per attribute change
pub fn format_change(change: &AttrChange) -> String {
    match change {
        AttrChange::Added { name, value } => format!("{name} = {}", format_value(value)),
        AttrChange::Removed { name, old } => format!("{name} = {} → null", format_value(old)),
        AttrChange::Changed { name, old, new } => {
            format!("{name} = {} → {}", format_value(old), format_value(new))
        }
        AttrChange::Pending { name, old } => match old {
            Some(old) => format!("{name} = {} → (known after apply)", format_value(old)),
            None => format!("{name} = (known after apply)"),
        },
    }
}

/// Display a change set in a user-friendly format
pub fn display_change_set(change_set: &ChangeSet, show_unchanged: bool) {
    let summary = change_set.summary();

    if !change_set.has_changes() {
        println!();
        println!("  {} No changes. Infrastructure matches the configuration.", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    );
    println!("│");

    for op in change_set.operations() {
        if op.action == Action::NoOp && !show_unchanged {
            continue;
        }

        let detail = match (op.action, &op.prior) {
            (Action::Replace, Some(prior)) => format!("({} → {})", prior.kind, op.kind),
            (Action::Create, _) => format!("({})", op.kind),
            (_, Some(prior)) => format!("({} {})", op.kind, prior.id),
            (_, None) => format!("({})", op.kind),
        };
        println!(
            "│ {} {} {}",
            action_symbol(op.action),
            format!("{:<30}", op.name).bold(),
            detail.dimmed()
        );

        if op.action.is_change() {
            for change in &op.changes {
                let line = format_change(change);
                let line = match change {
                    AttrChange::Added { .. } => line.green(),
                    AttrChange::Removed { .. } => line.red(),
                    AttrChange::Changed { .. } => line.yellow(),
                    AttrChange::Pending { .. } => line.dimmed(),
                };
                println!("│         {line}");
            }
        }
    }

    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!("│ {}", format_summary(&summary));
    println!("└─────────────────────────────────────────────────────┘");
}

/// "Plan: 3 to create, 1 to update, ..." line
pub fn format_summary(summary: &PlanSummary) -> String {
    let mut parts = vec![
        format!("{} to create", summary.create),
        format!("{} to update", summary.update),
    ];
    if summary.replace > 0 {
        parts.push(format!("{} to replace", summary.replace));
    }
    parts.push(format!("{} to delete", summary.delete));
    format!("Plan: {}, {} unchanged", parts.join(", "), summary.no_op)
}
