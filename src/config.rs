//! Project configuration (`keel.toml`)
//!
//! ```toml
//! [project]
//! name = "airtek"
//! spec = "infra.toml"
//! stack = "dev"
//!
//! [apply]
//! jobs = 8
//! fail_fast = false
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 250
//! backoff_factor = 2.0
//! max_delay_ms = 10000
//! ```
//!
//! Every section is optional. Relative paths resolve against the directory
//! holding the config file.

use anyhow::{Context, Result, bail};
use declarative::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub project: ProjectConfig,
    pub apply: ApplyConfig,
    pub retry: RetrySettings,

    /// Directory the config was loaded from
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Display name
    pub name: Option<String>,
    /// Resource document, TOML or JSON
    pub spec: String,
    /// Default stack
    pub stack: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            spec: "stack.toml".to_string(),
            stack: "dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub jobs: usize,
    pub fail_fast: bool,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            fail_fast: false,
        }
    }
}

/// Retry policy in config-file units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            backoff_factor: defaults.backoff_factor,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl KeelConfig {
    /// Load the project config
    ///
    /// An explicit path must exist. Without one, `keel.toml` in the working
    /// directory is used if present, defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => paths::expand(&path.to_string_lossy()),
            None => {
                let cwd = std::env::current_dir().context("Could not determine working directory")?;
                let candidate = cwd.join(paths::CONFIG_FILE);
                if !candidate.exists() {
                    log::debug!("No {} found, using defaults", paths::CONFIG_FILE);
                    return Ok(Self {
                        root: cwd,
                        ..Self::default()
                    });
                }
                candidate
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML format in keel config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let factor = self.retry.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            bail!("retry.backoff_factor must be a finite number of at least 1.0, got {factor}");
        }
        Ok(())
    }

    /// Resolve a path relative to the config directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = paths::expand(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.root.join(expanded)
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = KeelConfig::parse(
            r#"
[project]
name = "airtek"
spec = "infra/stack.toml"
stack = "prod"

[apply]
jobs = 8
fail_fast = true

[retry]
max_attempts = 6
base_delay_ms = 100
backoff_factor = 1.5
max_delay_ms = 2000
"#,
        )
        .unwrap();

        assert_eq!(config.project.name.as_deref(), Some("airtek"));
        assert_eq!(config.project.stack, "prod");
        assert_eq!(config.apply.jobs, 8);
        assert!(config.apply.fail_fast);

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 6);
        assert_eq!(retry.base_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = KeelConfig::parse("[apply]\njobs = 2\n").unwrap();
        assert_eq!(config.apply.jobs, 2);
        assert!(!config.apply.fail_fast);
        assert_eq!(config.project.stack, "dev");
        assert_eq!(config.retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_invalid_value_rejected() {
        assert!(KeelConfig::parse("[apply]\njobs = \"many\"\n").is_err());
    }

    #[test]
    fn test_shrinking_backoff_factor_rejected() {
        let err = KeelConfig::parse("[retry]\nbackoff_factor = -2.0\n").unwrap_err();
        assert!(err.to_string().contains("backoff_factor"));
        assert!(KeelConfig::parse("[retry]\nbackoff_factor = 0.5\n").is_err());
        assert!(KeelConfig::parse("[retry]\nbackoff_factor = nan\n").is_err());
        assert!(KeelConfig::parse("[retry]\nbackoff_factor = 1.0\n").is_ok());
    }

    #[test]
    fn test_load_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        fs::write(&path, "[project]\nspec = \"stack.toml\"\n").unwrap();

        let config = KeelConfig::load(Some(&path)).unwrap();
        assert_eq!(config.resolve(&config.project.spec), dir.path().join("stack.toml"));
        assert_eq!(config.resolve("/abs/spec.json"), PathBuf::from("/abs/spec.json"));
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(KeelConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
