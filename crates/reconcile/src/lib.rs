//! # Reconcile
//!
//! Declarative single-host stack reconciliation.
//!
//! A stack file is loaded into a validated [`Plan`]. Each pass observes the
//! host into a [`RuntimeState`], diffs it against the plan into an ordered
//! list of [`ReconcileAction`]s, and hands those to the [`Executor`], which
//! applies them with retry, rollback and dependency-subtree isolation.
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{observe, reconcile, Capabilities, Plan};
//!
//! let plan = Plan::load(Path::new("keel.toml"))?;
//! let observed = observe(&plan, &caps)?;
//! for action in reconcile(&plan, &observed) {
//!     println!("{action}");
//! }
//! ```
//!
//! ## Capability Traits
//!
//! External collaborators are reached only through traits:
//!
//! - [`ContainerRuntime`]: create/start/stop/inspect/exec containers
//! - [`Filesystem`]: stat/chown/chmod/mkdir host paths
//! - [`Prober`]: run one health probe
//! - [`ProxyControl`]: validate and activate reverse proxy routes
//! - [`CertificateControl`]: read expiry, issue or renew certificates
//! - [`AlertSink`]: deliver escalations
//! - [`ProgressCallback`]: receive progress updates

pub mod action;
pub mod cancel;
pub mod capability;
pub mod error;
pub mod executor;
pub mod health;
pub mod plan;
pub mod reconciler;
pub mod retry;
pub mod spec;
pub mod state;
pub mod units;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use action::{ReconcileAction, StopReason};
pub use cancel::CancelToken;
pub use capability::{
    Alert, AlertSink, Capabilities, CertificateControl, ContainerInfo, ContainerRuntime,
    ContainerStatus, Filesystem, NoProgress, PathStat, Prober, ProgressCallback, ProxyControl,
};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{
    ActionOutcome, ActionRecord, ExecuteOptions, ExecuteReport, Executor, ServiceOutcome,
};
pub use health::{HealthMonitor, HealthState, HealthTracker};
pub use plan::{CertificatePolicy, CertificateSettings, Format, Plan, ProxySettings, StackFile};
pub use reconciler::reconcile;
pub use retry::{Backoff, RetryConfig, with_retry};
pub use spec::{
    HealthCheck, MountMode, OwnershipPolicy, PortMapping, Probe, PublicEndpoint, ResourceLimits,
    Route, ServiceSpec, VolumeBinding,
};
pub use state::{ObservedService, RuntimeState, observe};
