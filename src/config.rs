//! Stack file discovery and loading

use anyhow::{Context, Result, bail};
use reconcile::Plan;
use std::path::{Path, PathBuf};

use crate::paths;

/// File names looked up in the working directory, in order
pub const LOCAL_CANDIDATES: [&str; 2] = ["keel.toml", "keel.json"];

/// File name looked up in the config directory
pub const CONFIG_DIR_FILE: &str = "stack.toml";

/// A loaded stack file
#[derive(Debug)]
pub struct Stack {
    pub path: PathBuf,
    pub plan: Plan,
}

/// Find the stack file to use
///
/// An explicit path wins and must exist. Otherwise the working directory is
/// searched, then the config directory.
pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = paths::expand(&path.to_string_lossy());
        if !path.is_file() {
            bail!("Stack file not found: {}", path.display());
        }
        return Ok(path);
    }

    let mut searched = Vec::new();
    for name in LOCAL_CANDIDATES {
        let candidate = cwd.join(name);
        if candidate.is_file() {
            log::debug!("Using stack file {}", candidate.display());
            return Ok(candidate);
        }
        searched.push(candidate);
    }

    if let Ok(dir) = paths::config_dir() {
        let candidate = dir.join(CONFIG_DIR_FILE);
        if candidate.is_file() {
            log::debug!("Using stack file from config dir: {}", candidate.display());
            return Ok(candidate);
        }
        searched.push(candidate);
    }

    let searched: Vec<String> = searched.iter().map(|p| p.display().to_string()).collect();
    bail!(
        "No stack file found (searched {}). Pass one with --file",
        searched.join(", ")
    )
}

/// Discover and load the stack file
pub fn load(explicit: Option<&Path>) -> Result<Stack> {
    let cwd = std::env::current_dir().context("Could not determine working directory")?;
    let path = discover(explicit, &cwd)?;
    let plan = Plan::load(&path).with_context(|| format!("Could not load {}", path.display()))?;
    log::info!(
        "Loaded stack '{}' with {} service(s) from {}",
        plan.name,
        plan.services.len(),
        path.display()
    );
    Ok(Stack { path, plan })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const STACK: &str = r#"
[stack]
name = "sonar"

[[services]]
name = "db"
image = "postgres:15"
"#;

    #[test]
    fn test_discover_prefers_toml_in_cwd() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keel.json"), "{}").unwrap();
        fs::write(dir.path().join("keel.toml"), STACK).unwrap();

        let found = discover(None, dir.path()).unwrap();
        assert_eq!(found, dir.path().join("keel.toml"));
    }

    #[test]
    fn test_discover_explicit_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = discover(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Stack file not found"));
    }

    #[test]
    fn test_load_keeps_config_error_in_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        fs::write(&path, "[stack]\nname = \"sonar\"\n").unwrap();

        let err = load(Some(&path)).unwrap_err();
        let cause = err
            .chain()
            .find_map(|e| e.downcast_ref::<reconcile::Error>())
            .unwrap();
        assert!(matches!(cause, reconcile::Error::Config { .. }));
    }

    #[test]
    fn test_load_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, STACK).unwrap();

        let stack = load(Some(&path)).unwrap();
        assert_eq!(stack.plan.name, "sonar");
        assert_eq!(stack.path, path);
    }
}
