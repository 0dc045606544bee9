//! Validate-then-swap activation of the reverse proxy configuration.

use reconcile::{ProxyControl, Route};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::routes::Renderer;

/// Placeholder replaced by the candidate file in the validate command
pub const CONFIG_PLACEHOLDER: &str = "{config}";

/// How the proxy is told to pick up a new configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reload {
    /// Run a command, e.g. `nginx -s reload`
    Command(Vec<String>),
    /// POST to an admin endpoint
    Http(String),
    /// The proxy watches the file itself
    None,
}

/// Manages one proxy configuration file.
///
/// Activation never leaves a partial file in place: the candidate is written
/// next to the active file, validated, and renamed over it. A `.bak` copy of
/// the previous configuration is kept and put back if the reload fails.
pub struct ProxyManager {
    config_path: PathBuf,
    validate: Vec<String>,
    reload: Reload,
    renderer: Renderer,
    agent: ureq::Agent,
}

impl ProxyManager {
    /// Create a manager for a configuration file.
    pub fn new(config_path: impl Into<PathBuf>, renderer: Renderer) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(10)))
            .build();
        Self {
            config_path: config_path.into(),
            validate: Vec::new(),
            reload: Reload::None,
            renderer,
            agent: config.into(),
        }
    }

    /// Command that checks a configuration before it goes live.
    ///
    /// With a `{config}` argument the candidate file is checked before the
    /// swap. Without one the command checks the proxy's whole configuration
    /// after the swap, and a rejection puts the previous file back.
    #[must_use]
    pub fn with_validate(mut self, command: Vec<String>) -> Self {
        self.validate = command;
        self
    }

    /// How to reload the proxy after a swap.
    #[must_use]
    pub fn with_reload(mut self, reload: Reload) -> Self {
        self.reload = reload;
        self
    }

    /// Path of the managed configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Render the configuration for a route set without activating it.
    pub fn render(&self, routes: &[Route]) -> String {
        self.renderer.render(routes)
    }

    /// Contents of the active configuration, `None` if there is none.
    pub fn active_config(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.config_path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&self.config_path, e)),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.config_path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Activate the configuration for a route set.
    pub fn apply(&self, routes: &[Route]) -> Result<()> {
        let rendered = self.render(routes);
        let candidate = self.sibling(".new");
        let backup = self.sibling(".bak");

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(&candidate, &rendered).map_err(|e| Error::io(&candidate, e))?;

        let checks_candidate = self.validate.iter().any(|a| a.contains(CONFIG_PLACEHOLDER));
        if checks_candidate && let Err(e) = self.run_validate(&candidate) {
            let _ = fs::remove_file(&candidate);
            return Err(e);
        }

        let had_previous = self.config_path.exists();
        if had_previous {
            fs::copy(&self.config_path, &backup).map_err(|e| Error::io(&backup, e))?;
        }
        fs::rename(&candidate, &self.config_path).map_err(|e| Error::io(&self.config_path, e))?;

        if !checks_candidate && let Err(e) = self.run_validate(&self.config_path) {
            self.restore(had_previous, &backup)?;
            return Err(e);
        }

        if let Err(e) = self.run_reload() {
            log::warn!("Reload failed, restoring previous proxy configuration");
            self.restore(had_previous, &backup)?;
            if had_previous && let Err(again) = self.run_reload() {
                log::warn!("Reload of previous configuration also failed: {}", again);
            }
            return Err(Error::Reload {
                message: e.to_string(),
            });
        }

        log::info!(
            "Activated {} route(s) in {}",
            routes.len(),
            self.config_path.display()
        );
        Ok(())
    }

    fn restore(&self, had_previous: bool, backup: &Path) -> Result<()> {
        if had_previous {
            fs::rename(backup, &self.config_path).map_err(|e| Error::io(backup, e))
        } else {
            fs::remove_file(&self.config_path).map_err(|e| Error::io(&self.config_path, e))
        }
    }

    fn run_validate(&self, config: &Path) -> Result<()> {
        if self.validate.is_empty() {
            return Ok(());
        }
        let path = config.display().to_string();
        let command: Vec<String> = self
            .validate
            .iter()
            .map(|a| a.replace(CONFIG_PLACEHOLDER, &path))
            .collect();
        run_command(&command).map_err(|stderr| Error::Validation {
            command: command.join(" "),
            stderr,
        })
    }

    fn run_reload(&self) -> Result<()> {
        match &self.reload {
            Reload::Command(command) => {
                run_command(command).map_err(|message| Error::Reload { message })
            }
            Reload::Http(url) => {
                self.agent.post(url).send_empty()?;
                Ok(())
            }
            Reload::None => Ok(()),
        }
    }

    /// Whether the active file matches what these routes render to.
    pub fn matches(&self, routes: &[Route]) -> Result<bool> {
        let Some(active) = self.active_config()? else {
            return Ok(false);
        };
        let wanted = self.render(routes);
        Ok(blake3::hash(active.as_bytes()) == blake3::hash(wanted.as_bytes()))
    }
}

/// Run a command line, returning stderr on a non-zero exit.
fn run_command(command: &[String]) -> std::result::Result<(), String> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    log::debug!("Running {}", command.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("failed to execute {}: {}", program, e))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(if stderr.is_empty() {
            format!("{} exited with {}", program, output.status)
        } else {
            stderr
        })
    }
}

impl ProxyControl for ProxyManager {
    fn in_sync(&self, routes: &[Route]) -> reconcile::Result<bool> {
        self.matches(routes).map_err(|e| proxy_error(&e))
    }

    fn activate(&self, routes: &[Route]) -> reconcile::Result<()> {
        self.apply(routes).map_err(|e| proxy_error(&e))
    }
}

fn proxy_error(e: &Error) -> reconcile::Error {
    reconcile::Error::runtime("proxy", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(hostname: &str) -> Route {
        Route {
            hostname: hostname.into(),
            service: "app".into(),
            port: 9000,
            tls: false,
        }
    }

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    fn manager(dir: &Path) -> ProxyManager {
        ProxyManager::new(dir.join("conf.d/keel.conf"), Renderer::new("sonar", dir))
            .with_validate(cmd(&["grep", "-q", "server_name", "{config}"]))
            .with_reload(Reload::Command(cmd(&["true"])))
    }

    #[test]
    fn test_activate_writes_and_keeps_backup() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path());

        proxy.apply(&[route("a.example.com")]).unwrap();
        let first = proxy.active_config().unwrap().unwrap();
        assert!(first.contains("server_name a.example.com;"));
        assert!(!dir.path().join("conf.d/keel.conf.bak").exists());
        assert!(!dir.path().join("conf.d/keel.conf.new").exists());

        proxy.apply(&[route("b.example.com")]).unwrap();
        let backup = fs::read_to_string(dir.path().join("conf.d/keel.conf.bak")).unwrap();
        assert_eq!(backup, first);
    }

    #[test]
    fn test_rejected_candidate_leaves_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path());
        proxy.apply(&[route("a.example.com")]).unwrap();
        let before = proxy.active_config().unwrap();

        // No routes renders no server_name, which the validator rejects
        let err = proxy.apply(&[]).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(proxy.active_config().unwrap(), before);
        assert!(!dir.path().join("conf.d/keel.conf.new").exists());
    }

    #[test]
    fn test_failed_post_swap_validation_restores() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path());
        proxy.apply(&[route("a.example.com")]).unwrap();
        let before = proxy.active_config().unwrap();

        let proxy = manager(dir.path()).with_validate(cmd(&["false"]));
        assert!(proxy.apply(&[route("b.example.com")]).is_err());
        assert_eq!(proxy.active_config().unwrap(), before);
    }

    #[test]
    fn test_failed_reload_restores_previous() {
        let dir = tempfile::tempdir().unwrap();
        manager(dir.path()).apply(&[route("a.example.com")]).unwrap();

        let proxy = manager(dir.path()).with_reload(Reload::Command(cmd(&["false"])));
        let err = proxy.apply(&[route("b.example.com")]).unwrap_err();
        assert!(matches!(err, Error::Reload { .. }));
        assert!(
            proxy
                .active_config()
                .unwrap()
                .unwrap()
                .contains("a.example.com")
        );
    }

    #[test]
    fn test_failed_first_reload_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path()).with_reload(Reload::Command(cmd(&["false"])));
        assert!(proxy.apply(&[route("a.example.com")]).is_err());
        assert_eq!(proxy.active_config().unwrap(), None);
    }

    #[test]
    fn test_in_sync_detects_drift() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path());
        let routes = vec![route("a.example.com")];

        assert!(!proxy.in_sync(&routes).unwrap());
        proxy.activate(&routes).unwrap();
        assert!(proxy.in_sync(&routes).unwrap());

        fs::write(proxy.config_path(), "# edited by hand\n").unwrap();
        assert!(!proxy.in_sync(&routes).unwrap());
    }

    #[test]
    fn test_unreachable_admin_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let proxy = manager(dir.path()).with_reload(Reload::Http("http://127.0.0.1:9/reload".into()));
        let err = proxy.activate(&[route("a.example.com")]).unwrap_err();
        assert!(matches!(err, reconcile::Error::Runtime { .. }));
    }
}
