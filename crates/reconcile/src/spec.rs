//! Validated, immutable service and volume specifications
//!
//! These are produced by the plan loader and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// How a host path is mounted into the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    Rw,
    Ro,
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountMode::Rw => write!(f, "rw"),
            MountMode::Ro => write!(f, "ro"),
        }
    }
}

/// What FixOwnership does when existing content is owned by someone else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OwnershipPolicy {
    /// Fix the directory itself, refuse if any entry below it has a foreign owner
    #[default]
    Fail,
    /// Rewrite ownership of the whole tree
    Recursive,
}

/// A host directory bound into a service container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits (e.g. 0o750)
    pub permissions: u32,
    pub policy: OwnershipPolicy,
}

/// Resource ceilings for a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes
    pub memory: Option<u64>,
    /// Relative CPU weight
    pub cpu_shares: Option<u64>,
}

/// How a service is probed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Run a command inside the container, success on exit status 0
    Command(Vec<String>),
    /// GET an URL from the host, success on a 2xx status
    Http(String),
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Command(args) => write!(f, "exec {}", args.join(" ")),
            Probe::Http(url) => write!(f, "GET {}", url),
        }
    }
}

/// Health check definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub probe: Probe,
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failures before a healthy service is declared unhealthy
    pub retries: u32,
    /// Grace period for a starting service to become healthy
    pub start_period: Duration,
}

/// Public endpoint routed through the reverse proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicEndpoint {
    pub hostname: String,
    /// Upstream port on the host
    pub port: u16,
    pub tls: bool,
}

/// Published port mapping host:container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A fully validated service specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub volumes: Vec<VolumeBinding>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub limits: ResourceLimits,
    pub health: Option<HealthCheck>,
    pub depends_on: Vec<String>,
    pub public: Option<PublicEndpoint>,
}

impl ServiceSpec {
    /// Content fingerprint of everything that requires a container restart
    ///
    /// Covers image, command, env, mounts, ports and limits, plus command
    /// probes, which run inside the container as its own health check. HTTP
    /// probes run from the host, so they are left out along with
    /// dependencies and the public endpoint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut field = |tag: &str, value: &str| {
            hasher.update(tag.as_bytes());
            hasher.update(&[0]);
            hasher.update(value.as_bytes());
            hasher.update(&[0xff]);
        };

        field("image", &self.image);
        if let Some(cmd) = &self.command {
            field("command", &cmd.join("\u{1f}"));
        }
        for (key, value) in &self.env {
            field("env", &format!("{}={}", key, value));
        }
        for volume in &self.volumes {
            field(
                "mount",
                &format!(
                    "{}:{}:{}",
                    volume.host_path.display(),
                    volume.container_path,
                    volume.mode
                ),
            );
        }
        for port in &self.ports {
            field("port", &format!("{}:{}", port.host, port.container));
        }
        if let Some(memory) = self.limits.memory {
            field("memory", &memory.to_string());
        }
        if let Some(shares) = self.limits.cpu_shares {
            field("cpu_shares", &shares.to_string());
        }
        if let Some(health) = &self.health
            && let Probe::Command(cmd) = &health.probe
        {
            field(
                "health",
                &format!(
                    "{}|{}|{}|{}|{}",
                    cmd.join("\u{1f}"),
                    health.interval.as_millis(),
                    health.timeout.as_millis(),
                    health.retries,
                    health.start_period.as_millis()
                ),
            );
        }

        hasher.finalize().to_hex()[..16].to_string()
    }
}

/// A proxied route: hostname to upstream port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub hostname: String,
    pub service: String,
    pub port: u16,
    pub tls: bool,
}

impl Route {
    /// Build the route for a service, if it declares a public endpoint
    pub fn for_service(spec: &ServiceSpec) -> Option<Self> {
        spec.public.as_ref().map(|public| Self {
            hostname: public.hostname.clone(),
            service: spec.name.clone(),
            port: public.port,
            tls: public.tls,
        })
    }
}
