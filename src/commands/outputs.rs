//! `keel outputs`

use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::project::Project;
use crate::Context;
use crate::cli::OutputsArgs;
use crate::ui;

pub fn run(ctx: &Context, args: &OutputsArgs) -> Result<()> {
    let project = Project::load(ctx)?;
    let graph = project.graph()?;
    let exports = graph.resolve_exports(&project.records()?);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&exports)?);
        return Ok(());
    }

    if exports.is_empty() {
        ui::info("The resource document declares no exports");
        return Ok(());
    }
    print_exports(&exports);
    Ok(())
}

pub fn print_exports(exports: &BTreeMap<String, Option<Value>>) {
    println!("  {}", "Outputs".bold());
    for (name, value) in exports {
        match value {
            Some(value) => ui::kv(name, &format_output(value)),
            None => ui::kv(name, &"(not yet applied)".dimmed().to_string()),
        }
    }
}

/// Strings print bare, everything else as JSON
pub fn format_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_output() {
        assert_eq!(format_output(&json!("lb-1.elb.local")), "lb-1.elb.local");
        assert_eq!(format_output(&json!(5000)), "5000");
        assert_eq!(format_output(&json!(["a", "b"])), "[\"a\",\"b\"]");
    }
}
