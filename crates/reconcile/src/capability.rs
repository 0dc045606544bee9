//! Capability traits for the external collaborators
//!
//! The reconciler and executor never talk to docker, the filesystem, the
//! reverse proxy or the ACME agent directly. Implementations live in the
//! `dockerkit` and `gateway` crates and in the CLI; tests use in-crate fakes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::action::ReconcileAction;
use crate::error::Result;
use crate::executor::ActionOutcome;
use crate::spec::{OwnershipPolicy, Probe, Route, ServiceSpec};

/// Container status as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    /// Running, but the runtime's own health check reports failure
    Unhealthy,
}

/// What the runtime knows about one service container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub status: ContainerStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// Spec fingerprint read back from the container label
    pub fingerprint: Option<String>,
}

/// Container runtime control (create/start/stop/inspect/exec)
pub trait ContainerRuntime: Send + Sync {
    /// Check the runtime is reachable at all
    fn ping(&self) -> Result<()>;

    /// Inspect the container for a service, `None` if it does not exist
    fn inspect(&self, service: &str) -> Result<Option<ContainerInfo>>;

    /// Service names of every container labelled with this stack
    fn list_stack(&self) -> Result<Vec<String>>;

    /// Create and start a container, returning its id
    fn start(&self, spec: &ServiceSpec, fingerprint: &str) -> Result<String>;

    /// Stop and remove a service container
    fn stop(&self, service: &str) -> Result<()>;

    /// Stop a container and move it aside so a replacement can start
    fn retire(&self, service: &str) -> Result<()>;

    /// Bring a retired container back under its own name and start it
    fn restore(&self, service: &str) -> Result<()>;

    /// Remove a retired container for good
    fn discard(&self, service: &str) -> Result<()>;

    /// Run a command inside the service container, true on exit status 0
    fn exec(&self, service: &str, command: &[String], timeout: Duration) -> Result<bool>;
}

/// Ownership and mode of a host path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only (mode & 0o7777)
    pub mode: u32,
}

/// Host filesystem access (stat/chown/chmod/mkdir)
pub trait Filesystem: Send + Sync {
    /// Stat a directory, `None` if it does not exist
    fn stat(&self, path: &Path) -> Result<Option<PathStat>>;

    /// Create a directory and its parents
    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<()>;

    /// Change ownership, honoring the volume's conflict policy
    fn set_owner(&self, path: &Path, uid: u32, gid: u32, policy: OwnershipPolicy) -> Result<()>;

    /// Change permission bits
    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;
}

/// Runs a single health probe
pub trait Prober: Send + Sync {
    /// Probe a service once, true when healthy
    fn probe(&self, service: &str, probe: &Probe, timeout: Duration) -> bool;
}

/// Reverse proxy configuration control
pub trait ProxyControl: Send + Sync {
    /// Whether the active configuration matches these routes
    fn in_sync(&self, routes: &[Route]) -> Result<bool>;

    /// Render, validate and atomically activate these routes, then reload
    fn activate(&self, routes: &[Route]) -> Result<()>;
}

/// Certificate agent control
pub trait CertificateControl: Send + Sync {
    /// Expiry of the current certificate for a domain, `None` if missing
    fn expiry(&self, domain: &str) -> Result<Option<DateTime<Utc>>>;

    /// Issue a certificate, or renew it when one exists
    fn issue_or_renew(&self, domain: &str) -> Result<()>;
}

/// An operator-visible escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

/// Receives escalated alerts
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert) -> Result<()>;
}

/// Progress callback for action execution
///
/// Called from worker threads, so it takes `&self`.
pub trait ProgressCallback: Send + Sync {
    /// Called when an action starts
    fn on_action_start(&self, action: &ReconcileAction);

    /// Called when an action completes, fails or is skipped
    fn on_action_complete(&self, action: &ReconcileAction, outcome: &ActionOutcome, elapsed: Duration);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_action_start(&self, _action: &ReconcileAction) {}
    fn on_action_complete(&self, _action: &ReconcileAction, _outcome: &ActionOutcome, _elapsed: Duration) {}
}

/// The set of collaborators a reconciliation pass works against
#[derive(Clone)]
pub struct Capabilities {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub filesystem: Arc<dyn Filesystem>,
    pub proxy: Option<Arc<dyn ProxyControl>>,
    pub certificates: Option<Arc<dyn CertificateControl>>,
    pub alerts: Option<Arc<dyn AlertSink>>,
}

impl Capabilities {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, filesystem: Arc<dyn Filesystem>) -> Self {
        Self {
            runtime,
            filesystem,
            proxy: None,
            certificates: None,
            alerts: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyControl>) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_certificates(mut self, certificates: Arc<dyn CertificateControl>) -> Self {
        self.certificates = Some(certificates);
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }
}
