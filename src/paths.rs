//! Centralized path resolution for keel
//!
//! # Environment Variables
//!
//! - `KEEL_STATE_DIR` - Override the state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `KEEL_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/keel` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\keel`
//!    - macOS/Linux: `~/.local/state/keel`
//!
//! Each stack gets its own directory below the state directory:
//!
//! ```text
//! <state_dir>/<stack>/resources/<name>.json   last-applied records
//! <state_dir>/<stack>/cloud.json              local provider inventory
//! ```

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "KEEL_STATE_DIR";

/// Project file looked up in the working directory
pub const CONFIG_FILE: &str = "keel.toml";

/// Get the keel state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("keel");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("keel");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("keel");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Directory holding everything for one stack
pub fn stack_dir(state_dir: &Path, stack: &str) -> Result<PathBuf> {
    validate_stack(stack)?;
    Ok(state_dir.join(stack))
}

/// Directory holding a stack's state records
pub fn resources_dir(stack_dir: &Path) -> PathBuf {
    stack_dir.join("resources")
}

/// Inventory file of the local provider
pub fn cloud_file(stack_dir: &Path) -> PathBuf {
    stack_dir.join("cloud.json")
}

/// Stack names become directory names
fn validate_stack(stack: &str) -> Result<()> {
    if stack.is_empty() {
        bail!("Stack name cannot be empty");
    }
    if !stack
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || stack.starts_with('.')
    {
        bail!("Invalid stack name '{}': use letters, digits, '-', '_' or '.'", stack);
    }
    Ok(())
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
