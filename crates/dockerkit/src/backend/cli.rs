//! Real docker CLI backend using `docker` commands.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{Inspect, SERVICE_LABEL};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Backend that executes real `docker` commands.
pub struct DockerCli {
    /// Path to the docker executable
    docker_path: String,
}

impl DockerCli {
    /// Create a new DockerCli.
    ///
    /// Returns an error if docker is not installed.
    pub fn new() -> Result<Self> {
        let docker_path = find_docker()?;
        Ok(Self { docker_path })
    }

    /// Use a specific docker executable.
    pub fn with_path(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }

    /// Run a docker command and return output.
    fn run_docker(&self, args: &[&str]) -> Result<Output> {
        log::debug!("docker {}", args.join(" "));
        Command::new(&self.docker_path)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                message: format!("failed to execute docker: {}", e),
                stderr: String::new(),
            })
    }

    /// Run a docker command and check for success.
    fn run_docker_checked(&self, args: &[&str], object: Option<&str>) -> Result<String> {
        let output = self.run_docker(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_docker_output(&stderr, object));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Backend for DockerCli {
    fn ping(&self) -> Result<()> {
        self.run_docker_checked(&["version", "--format", "{{.Server.Version}}"], None)
            .map(|_| ())
    }

    fn inspect(&self, container: &str) -> Result<Option<Inspect>> {
        match self.run_docker_checked(&["inspect", "--type", "container", container], Some(container))
        {
            Ok(json) => Inspect::parse(&json),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_labelled(&self, label: &str) -> Result<Vec<(String, String)>> {
        let filter = format!("label={}", label);
        let format = format!("{{{{.Names}}}}\t{{{{.Label \"{}\"}}}}", SERVICE_LABEL);
        let stdout =
            self.run_docker_checked(&["ps", "-a", "--filter", &filter, "--format", &format], None)?;
        Ok(parse_ps_lines(&stdout))
    }

    fn ensure_network(&self, name: &str) -> Result<()> {
        match self.run_docker_checked(&["network", "inspect", name], Some(name)) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                log::info!("Creating network {}", name);
                self.run_docker_checked(&["network", "create", name], Some(name))
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let name = args
            .iter()
            .position(|a| *a == "--name")
            .and_then(|i| args.get(i + 1))
            .copied();
        let stdout = self.run_docker_checked(&args, name)?;
        Ok(stdout.trim().to_string())
    }

    fn start(&self, container: &str) -> Result<()> {
        self.run_docker_checked(&["start", container], Some(container))
            .map(|_| ())
    }

    fn stop(&self, container: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        self.run_docker_checked(&["stop", "-t", &secs, container], Some(container))
            .map(|_| ())
    }

    fn remove(&self, container: &str) -> Result<()> {
        self.run_docker_checked(&["rm", "-f", container], Some(container))
            .map(|_| ())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.run_docker_checked(&["rename", from, to], Some(from))
            .map(|_| ())
    }

    fn exec(&self, container: &str, command: &[String], timeout: Duration) -> Result<bool> {
        let mut child = Command::new(&self.docker_path)
            .arg("exec")
            .arg(container)
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status.success());
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    command: "exec".to_string(),
                    secs: timeout.as_secs(),
                });
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Parse `docker ps --format '{{.Names}}\t{{.Label ...}}'` lines.
fn parse_ps_lines(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, service) = line.split_once('\t')?;
            let (name, service) = (name.trim(), service.trim());
            (!name.is_empty() && !service.is_empty())
                .then(|| (name.to_string(), service.to_string()))
        })
        .collect()
}

/// Find the docker executable.
fn find_docker() -> Result<String> {
    let paths = ["/usr/bin/docker", "/usr/local/bin/docker"];

    for path in &paths {
        if std::path::Path::new(path).exists() {
            return Ok(path.to_string());
        }
    }

    let output = Command::new("which")
        .arg("docker")
        .output()
        .map_err(|_| Error::DockerNotFound)?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(path);
        }
    }

    Err(Error::DockerNotFound)
}
