//! Error types for stack reconciliation.
//!
//! Errors are categorized so the executor can decide between retrying,
//! isolating a dependency subtree, and aborting the whole run.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::health::HealthState;

/// Categories of reconciliation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad plan input, fatal at load
    Config,
    /// Dependency graph has a cycle, fatal at load
    Cycle,
    /// Filesystem stat/chown/chmod/mkdir failure
    Filesystem,
    /// Container runtime refused an operation for one service
    Runtime,
    /// A service did not become healthy in time
    Health,
    /// Certificate agent failure
    Certificate,
    /// An infrastructure dependency could not be reached at all
    Unreachable,
    /// The run was cancelled
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors of this category abort before any action runs.
    pub fn is_load_time(&self) -> bool {
        matches!(self, Self::Config | Self::Cycle)
    }

    /// Short user-facing description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Config => "Invalid stack configuration",
            Self::Cycle => "Dependency cycle",
            Self::Filesystem => "Filesystem error",
            Self::Runtime => "Container runtime error",
            Self::Health => "Health timeout",
            Self::Certificate => "Certificate error",
            Self::Unreachable => "Infrastructure unreachable",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Config => "Fix the named field in the stack file and run again",
            Self::Cycle => "Remove one of the depends_on edges in the reported cycle",
            Self::Filesystem => "Check the host path, its owner and permissions",
            Self::Runtime => "Inspect the container logs for the failing service",
            Self::Health => "Check the health check definition and the service logs",
            Self::Certificate => "Check DNS for the hostname and the certificate agent logs",
            Self::Unreachable => "Make sure the container runtime daemon is running",
            Self::Cancelled => "Run apply again to continue from the observed state",
        }
    }
}

/// Errors that can occur while loading, reconciling or applying a stack.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid plan input
    #[error("invalid config at {field}: {message}")]
    Config {
        /// Path of the offending field, e.g. `services[1].volumes[0].host_path`
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The dependency graph contains a cycle
    #[error("dependency cycle: {}", path.join(" -> "))]
    DependencyCycle {
        /// Full cycle path, first and last entries are the same service
        path: Vec<String>,
    },

    /// Filesystem operation failed
    #[error("filesystem error at {}: {message}", path.display())]
    Filesystem {
        /// Path the operation targeted
        path: PathBuf,
        /// Underlying cause
        message: String,
        /// Whether the failure looks transient
        retryable: bool,
    },

    /// Container runtime operation failed for a service
    #[error("runtime error for {service}: {message}")]
    Runtime {
        /// Service the operation targeted
        service: String,
        /// Underlying cause
        message: String,
    },

    /// A service did not reach Healthy within the allowed time
    #[error("{service} not healthy after {}s (last state: {state})", waited.as_secs())]
    HealthTimeout {
        /// Service being waited on
        service: String,
        /// How long the executor waited
        waited: Duration,
        /// Last observed health state
        state: HealthState,
    },

    /// Certificate status/issuance failed
    #[error("certificate error for {domain}: {message}")]
    Certificate {
        /// Domain the certificate covers
        domain: String,
        /// Underlying cause
        message: String,
    },

    /// An external collaborator is not reachable at all
    #[error("{component} unreachable: {message}")]
    Unreachable {
        /// Which collaborator (container runtime, proxy, ...)
        component: String,
        /// Underlying cause
        message: String,
    },

    /// Cooperative cancellation was requested
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Build a config error for a field path.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a runtime error for a service.
    pub fn runtime(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Build a filesystem error from an IO error, classifying transience.
    pub fn filesystem(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let retryable = matches!(
            err.kind(),
            ErrorKind::WouldBlock
                | ErrorKind::Interrupted
                | ErrorKind::TimedOut
                | ErrorKind::ResourceBusy
        );
        Self::Filesystem {
            path: path.into(),
            message: err.to_string(),
            retryable,
        }
    }

    /// Build a certificate error for a domain.
    pub fn certificate(domain: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Certificate {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. } => ErrorCategory::Config,
            Error::DependencyCycle { .. } => ErrorCategory::Cycle,
            Error::Filesystem { .. } => ErrorCategory::Filesystem,
            Error::Runtime { .. } => ErrorCategory::Runtime,
            Error::HealthTimeout { .. } => ErrorCategory::Health,
            Error::Certificate { .. } => ErrorCategory::Certificate,
            Error::Unreachable { .. } => ErrorCategory::Unreachable,
            Error::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is worth retrying.
    ///
    /// Only transient filesystem errors and certificate agent failures
    /// qualify; container start/stop is never retried automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Filesystem { retryable, .. } => *retryable,
            Error::Certificate { .. } => true,
            _ => false,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
