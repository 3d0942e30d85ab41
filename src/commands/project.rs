//! Project context shared by the stack commands

use anyhow::{Context as _, Result};
use declarative::{ApplyOptions, FileStateStore, Graph, StateRecord, StateStore};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::KeelConfig;
use crate::provider::LocalProvider;
use crate::{paths, schema};

/// Resolved config, stack and file locations for one invocation
#[derive(Debug)]
pub struct Project {
    pub config: KeelConfig,
    pub stack: String,
    pub spec_path: PathBuf,
    pub stack_dir: PathBuf,
}

impl Project {
    /// Resolve the project from config file and command-line overrides
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = KeelConfig::load(ctx.config.as_deref())?;
        let stack = ctx
            .stack
            .clone()
            .unwrap_or_else(|| config.project.stack.clone());
        let spec_path = match &ctx.spec {
            Some(path) => paths::expand(&path.to_string_lossy()),
            None => config.resolve(&config.project.spec),
        };
        let stack_dir = paths::stack_dir(&paths::state_dir()?, &stack)?;

        log::debug!(
            "Project {} stack '{}' (document {}, state {})",
            config.project.name.as_deref().unwrap_or("keel"),
            stack,
            spec_path.display(),
            stack_dir.display()
        );

        Ok(Self {
            config,
            stack,
            spec_path,
            stack_dir,
        })
    }

    /// Display name for headers
    pub fn title(&self) -> String {
        let name = self.config.project.name.as_deref().unwrap_or("keel");
        format!("{} ({})", name, self.stack)
    }

    /// Load and validate the resource document
    pub fn graph(&self) -> Result<Graph> {
        schema::load_graph(&self.spec_path)
    }

    pub fn state(&self) -> FileStateStore {
        FileStateStore::new(paths::resources_dir(&self.stack_dir))
    }

    /// Load every state record of the stack
    pub fn records(&self) -> Result<BTreeMap<String, StateRecord>> {
        let state = self.state();
        state
            .load()
            .with_context(|| format!("Could not load state for stack '{}'", self.stack))
    }

    pub fn provider(&self) -> Result<LocalProvider> {
        LocalProvider::open(paths::cloud_file(&self.stack_dir))
    }

    /// Engine options from config, overridden by flags
    pub fn apply_options(&self, args: &ApplyArgs) -> ApplyOptions {
        ApplyOptions {
            jobs: args.jobs.unwrap_or(self.config.apply.jobs).max(1),
            fail_fast: args.fail_fast || self.config.apply.fail_fast,
            retry: self.config.retry_config(),
            ..ApplyOptions::default()
        }
    }
}

/// Project rooted in a scratch directory with the given resource document
#[cfg(test)]
pub fn test_project(dir: &std::path::Path, document: &str) -> Project {
    let spec_path = dir.join("stack.toml");
    std::fs::write(&spec_path, document).unwrap();
    Project {
        config: KeelConfig::default(),
        stack: "test".into(),
        spec_path,
        stack_dir: dir.join("state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(jobs: Option<usize>, fail_fast: bool) -> ApplyArgs {
        ApplyArgs {
            jobs,
            fail_fast,
            yes: false,
            dry_run: false,
        }
    }

    fn project(config: KeelConfig) -> Project {
        Project {
            config,
            stack: "dev".into(),
            spec_path: PathBuf::from("stack.toml"),
            stack_dir: PathBuf::from("/tmp/keel/dev"),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let config = KeelConfig::parse("[apply]\njobs = 2\nfail_fast = false\n").unwrap();
        let project = project(config);

        let from_config = project.apply_options(&args(None, false));
        assert_eq!(from_config.jobs, 2);
        assert!(!from_config.fail_fast);

        let overridden = project.apply_options(&args(Some(16), true));
        assert_eq!(overridden.jobs, 16);
        assert!(overridden.fail_fast);
    }

    #[test]
    fn test_zero_jobs_clamped() {
        let project = project(KeelConfig::default());
        assert_eq!(project.apply_options(&args(Some(0), false)).jobs, 1);
    }

    #[test]
    fn test_title_uses_project_name() {
        let config = KeelConfig::parse("[project]\nname = \"airtek\"\n").unwrap();
        assert_eq!(project(config).title(), "airtek (dev)");
        assert_eq!(project(KeelConfig::default()).title(), "keel (dev)");
    }
}
