use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure: plan, apply and destroy resource stacks", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project config file (default: ./keel.toml)
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stack to operate on (default: project stack, or "dev")
    #[arg(short, long, global = true, env = "KEEL_STACK")]
    pub stack: Option<String>,

    /// Resource document (default: from keel.toml)
    #[arg(long, global = true)]
    pub spec: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and delete resources to match the document
    Apply(ApplyArgs),

    /// Delete every resource recorded for the stack
    Destroy(ApplyArgs),

    /// Re-read recorded resources from the provider
    Refresh,

    /// Show exported values
    Outputs(OutputsArgs),

    /// Check the resource document without touching state
    Validate,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Also list resources that are unchanged
    #[arg(long)]
    pub all: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Number of parallel provider calls
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop scheduling new operations after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without applying it
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct OutputsArgs {
    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}
