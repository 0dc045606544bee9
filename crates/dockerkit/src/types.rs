//! Core types: docker inspect output and `docker run` argument building.

use chrono::{DateTime, Datelike, Utc};
use reconcile::{ContainerStatus, Probe, ServiceSpec};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Label carrying the stack name
pub const STACK_LABEL: &str = "keel.stack";
/// Label carrying the service name
pub const SERVICE_LABEL: &str = "keel.service";
/// Label carrying the applied spec fingerprint
pub const FINGERPRINT_LABEL: &str = "keel.fingerprint";

/// Suffix for a container moved aside during replacement
pub const RETIRED_SUFFIX: &str = "-previous";

/// Subset of `docker inspect` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Inspect {
    /// Full container id
    pub id: String,
    /// Runtime state
    pub state: InspectState,
    /// Container configuration
    pub config: InspectConfig,
}

/// `State` block of `docker inspect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectState {
    /// Whether the main process is running
    pub running: bool,
    /// RFC 3339 start time, year 1 when never started
    #[serde(default)]
    pub started_at: Option<String>,
    /// Docker's own health check status, when one is configured
    #[serde(default)]
    pub health: Option<InspectHealth>,
}

/// `State.Health` block of `docker inspect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectHealth {
    /// `starting`, `healthy` or `unhealthy`
    pub status: String,
}

/// `Config` block of `docker inspect`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InspectConfig {
    /// Container labels
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
}

impl Inspect {
    /// Parse the JSON array printed by `docker inspect`.
    pub fn parse(json: &str) -> crate::Result<Option<Self>> {
        let mut all: Vec<Inspect> = serde_json::from_str(json)?;
        Ok(if all.is_empty() {
            None
        } else {
            Some(all.swap_remove(0))
        })
    }

    /// Status as the reconciler sees it
    pub fn status(&self) -> ContainerStatus {
        if !self.state.running {
            ContainerStatus::Stopped
        } else if self
            .state
            .health
            .as_ref()
            .is_some_and(|h| h.status == "unhealthy")
        {
            ContainerStatus::Unhealthy
        } else {
            ContainerStatus::Running
        }
    }

    /// Start time, `None` when the container never started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.state.started_at.as_deref()?;
        let parsed = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
        (parsed.year() > 1).then_some(parsed)
    }

    /// Value of a container label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config.labels.as_ref()?.get(key).map(String::as_str)
    }
}

/// Container name for a service of a stack
pub fn container_name(stack: &str, service: &str) -> String {
    format!("{}-{}", stack, service)
}

/// Go-style duration accepted by docker flags
fn go_duration(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

/// Quote an argument for the shell string docker passes to `/bin/sh -c`
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Build the arguments for `docker run`.
///
/// Command probes become docker's own health check so `docker inspect`
/// reports unhealthy containers between runs.
pub fn run_args(stack: &str, spec: &ServiceSpec, fingerprint: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-d".into(),
        "--name".into(),
        container_name(stack, &spec.name),
        "--restart".into(),
        "unless-stopped".into(),
        "--network".into(),
        stack.into(),
        "--network-alias".into(),
        spec.name.clone(),
        "--label".into(),
        format!("{}={}", STACK_LABEL, stack),
        "--label".into(),
        format!("{}={}", SERVICE_LABEL, spec.name),
        "--label".into(),
        format!("{}={}", FINGERPRINT_LABEL, fingerprint),
    ];

    for volume in &spec.volumes {
        args.push("-v".into());
        args.push(format!(
            "{}:{}:{}",
            volume.host_path.display(),
            volume.container_path,
            volume.mode
        ));
    }
    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{}={}", key, value));
    }
    for port in &spec.ports {
        args.push("-p".into());
        args.push(format!("{}:{}", port.host, port.container));
    }
    if let Some(memory) = spec.limits.memory {
        args.push("--memory".into());
        args.push(format!("{}b", memory));
    }
    if let Some(shares) = spec.limits.cpu_shares {
        args.push("--cpu-shares".into());
        args.push(shares.to_string());
    }

    if let Some(health) = &spec.health
        && let Probe::Command(cmd) = &health.probe
    {
        let joined: Vec<String> = cmd.iter().map(|a| shell_quote(a)).collect();
        args.extend([
            "--health-cmd".into(),
            joined.join(" "),
            "--health-interval".into(),
            go_duration(health.interval),
            "--health-timeout".into(),
            go_duration(health.timeout),
            "--health-retries".into(),
            health.retries.to_string(),
            "--health-start-period".into(),
            go_duration(health.start_period),
        ]);
    }

    args.push(spec.image.clone());
    if let Some(cmd) = &spec.command {
        args.extend(cmd.iter().cloned());
    }
    args
}
