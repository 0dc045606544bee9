//! Observed runtime state
//!
//! A `RuntimeState` is an immutable snapshot rebuilt on every reconciliation
//! pass from the capabilities. It is never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::capability::{Capabilities, ContainerStatus, PathStat};
use crate::error::{Error, Result};
use crate::plan::Plan;

/// Observed state of one declared service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedService {
    pub status: ContainerStatus,
    pub container_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Fingerprint of the spec the container was started from
    pub fingerprint: Option<String>,
}

impl ObservedService {
    pub fn stopped() -> Self {
        Self {
            status: ContainerStatus::Stopped,
            container_id: None,
            started_at: None,
            fingerprint: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}

/// Snapshot of everything the reconciler compares against
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeState {
    pub services: BTreeMap<String, ObservedService>,
    /// Volume host path to ownership/mode, `None` when missing
    pub volumes: BTreeMap<PathBuf, Option<PathStat>>,
    /// Whether the active proxy config matches the desired routes
    pub proxy_in_sync: Option<bool>,
    /// Domain to certificate expiry, `None` when no certificate exists
    pub certificates: BTreeMap<String, Option<DateTime<Utc>>>,
    /// Stack containers whose service is no longer declared
    pub orphans: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

impl RuntimeState {
    /// An empty host: nothing running, no volumes, nothing proxied
    pub fn empty(observed_at: DateTime<Utc>) -> Self {
        Self {
            services: BTreeMap::new(),
            volumes: BTreeMap::new(),
            proxy_in_sync: None,
            certificates: BTreeMap::new(),
            orphans: Vec::new(),
            observed_at,
        }
    }

    /// Observed state of a service, stopped if unknown
    pub fn service(&self, name: &str) -> ObservedService {
        self.services
            .get(name)
            .cloned()
            .unwrap_or_else(ObservedService::stopped)
    }

    /// Observed volume, `None` if missing or not observed
    pub fn volume(&self, path: &std::path::Path) -> Option<PathStat> {
        self.volumes.get(path).copied().flatten()
    }

    /// Number of declared services currently running
    pub fn running_count(&self) -> usize {
        self.services.values().filter(|s| s.is_running()).count()
    }
}

/// Observe the runtime, filesystem, proxy and certificate agent
///
/// A runtime that cannot be reached is fatal. Proxy and certificate status
/// failures are logged and treated as unknown, which forces a reload or
/// renewal attempt.
pub fn observe(plan: &Plan, caps: &Capabilities) -> Result<RuntimeState> {
    caps.runtime.ping().map_err(|e| match e {
        Error::Unreachable { .. } => e,
        other => Error::Unreachable {
            component: "container runtime".to_string(),
            message: other.to_string(),
        },
    })?;

    let mut state = RuntimeState::empty(Utc::now());

    for spec in &plan.services {
        let observed = match caps.runtime.inspect(&spec.name)? {
            Some(info) => ObservedService {
                status: info.status,
                container_id: Some(info.id),
                started_at: info.started_at,
                fingerprint: info.fingerprint,
            },
            None => ObservedService::stopped(),
        };
        log::debug!("Observed {}: {:?}", spec.name, observed.status);
        state.services.insert(spec.name.clone(), observed);

        for volume in &spec.volumes {
            let stat = caps.filesystem.stat(&volume.host_path)?;
            state.volumes.insert(volume.host_path.clone(), stat);
        }
    }

    state.orphans = caps
        .runtime
        .list_stack()?
        .into_iter()
        .filter(|name| plan.service(name).is_none())
        .collect();
    state.orphans.sort();

    if let Some(proxy) = &caps.proxy {
        state.proxy_in_sync = match proxy.in_sync(&plan.routes()) {
            Ok(in_sync) => Some(in_sync),
            Err(e) => {
                log::warn!("Could not read proxy configuration: {}", e);
                None
            }
        };
    }

    if let Some(certs) = &caps.certificates {
        for domain in plan.tls_domains() {
            let expiry = certs.expiry(&domain).unwrap_or_else(|e| {
                log::warn!("Could not read certificate for {}: {}", domain, e);
                None
            });
            state.certificates.insert(domain, expiry);
        }
    }

    Ok(state)
}
