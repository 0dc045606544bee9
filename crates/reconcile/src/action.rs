//! Reconcile actions - the unit of work handed from reconciler to executor

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::spec::OwnershipPolicy;

/// Why a container is being stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// The spec changed or the container is unhealthy; a StartService follows
    Replace,
    /// The service is no longer declared
    Orphan,
}

/// A single step towards the desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ReconcileAction {
    CreateVolume {
        service: String,
        path: PathBuf,
        permissions: u32,
    },
    FixOwnership {
        service: String,
        path: PathBuf,
        uid: u32,
        gid: u32,
        permissions: u32,
        policy: OwnershipPolicy,
    },
    StartService {
        service: String,
    },
    StopService {
        service: String,
        reason: StopReason,
    },
    WaitHealthy {
        service: String,
    },
    ReloadProxy,
    IssueOrRenewCertificate {
        domain: String,
    },
}

impl ReconcileAction {
    /// Action kind name, as shown in logs and plans
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateVolume { .. } => "CreateVolume",
            Self::FixOwnership { .. } => "FixOwnership",
            Self::StartService { .. } => "StartService",
            Self::StopService { .. } => "StopService",
            Self::WaitHealthy { .. } => "WaitHealthy",
            Self::ReloadProxy => "ReloadProxy",
            Self::IssueOrRenewCertificate { .. } => "IssueOrRenewCertificate",
        }
    }

    /// Target entity: service name, domain, or `proxy`
    pub fn target(&self) -> &str {
        match self {
            Self::CreateVolume { service, .. }
            | Self::FixOwnership { service, .. }
            | Self::StartService { service }
            | Self::StopService { service, .. }
            | Self::WaitHealthy { service } => service,
            Self::ReloadProxy => "proxy",
            Self::IssueOrRenewCertificate { domain } => domain,
        }
    }

    /// The service this action belongs to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::ReloadProxy | Self::IssueOrRenewCertificate { .. } => None,
            _ => Some(self.target()),
        }
    }

    /// Whether this stops an undeclared container
    pub fn is_orphan_stop(&self) -> bool {
        matches!(
            self,
            Self::StopService {
                reason: StopReason::Orphan,
                ..
            }
        )
    }

    /// One-line detail for plan output
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::CreateVolume {
                path, permissions, ..
            } => Some(format!("mkdir {} ({:04o})", path.display(), permissions)),
            Self::FixOwnership {
                path,
                uid,
                gid,
                permissions,
                policy,
                ..
            } => Some(format!(
                "chown {}:{} chmod {:04o} {}{}",
                uid,
                gid,
                permissions,
                path.display(),
                if *policy == OwnershipPolicy::Recursive {
                    " (recursive)"
                } else {
                    ""
                }
            )),
            Self::StopService {
                reason: StopReason::Replace,
                ..
            } => Some("replace".to_string()),
            Self::StopService {
                reason: StopReason::Orphan,
                ..
            } => Some("no longer declared".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReloadProxy => write!(f, "ReloadProxy"),
            _ => write!(f, "{}({})", self.kind(), self.target()),
        }
    }
}
