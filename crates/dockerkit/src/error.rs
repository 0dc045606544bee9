//! Error types for docker operations.
//!
//! Errors are categorized from the docker CLI's stderr so the caller can
//! tell an unreachable daemon (fatal for the whole run) from a failure that
//! only concerns one container.

use thiserror::Error;

/// Categories of docker errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The docker daemon cannot be reached
    Daemon,
    /// Container, image or network does not exist
    NotFound,
    /// Name already in use, port already allocated
    Conflict,
    /// Permission denied on the docker socket or a mount
    Permission,
    /// Command did not finish in time
    Timeout,
    /// docker executable not installed
    DockerNotFound,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether the whole runtime is unusable, not just one container.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Daemon | Self::DockerNotFound)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Daemon => "Docker daemon unreachable",
            Self::NotFound => "Not found",
            Self::Conflict => "Conflict",
            Self::Permission => "Permission denied",
            Self::Timeout => "Timed out",
            Self::DockerNotFound => "Docker not installed",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Daemon => "Start the docker service (systemctl start docker)",
            Self::NotFound => "Check the image reference and that the container exists",
            Self::Conflict => "Free the port or remove the conflicting container",
            Self::Permission => "Add the user to the docker group or run as root",
            Self::Timeout => "Check the container is responsive",
            Self::DockerNotFound => "Install docker and make sure it is on PATH",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during docker operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The docker daemon is not running or not reachable
    #[error("docker daemon unreachable: {message}")]
    Daemon {
        /// Output of the failed command
        message: String,
    },

    /// Object does not exist
    #[error("not found: {name}")]
    NotFound {
        /// Container, image or network name
        name: String,
    },

    /// Name or port conflict
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict
        message: String,
    },

    /// Permission denied
    #[error("permission denied: {message}")]
    Permission {
        /// Details about what permission was denied
        message: String,
    },

    /// Command exceeded its time budget
    #[error("docker {command} timed out after {secs}s")]
    Timeout {
        /// Subcommand that timed out
        command: String,
        /// Budget in seconds
        secs: u64,
    },

    /// docker is not installed or not found in PATH
    #[error("docker not found. Install it and make sure it is on PATH")]
    DockerNotFound,

    /// Command execution failed
    #[error("command failed: {message}: {stderr}")]
    CommandFailed {
        /// Description of what command failed
        message: String,
        /// Standard error output from the failed command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Daemon { .. } => ErrorCategory::Daemon,
            Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::Conflict { .. } => ErrorCategory::Conflict,
            Error::Permission { .. } => ErrorCategory::Permission,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::DockerNotFound => ErrorCategory::DockerNotFound,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether the object simply did not exist.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Create an error from docker command output.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_docker_output(stderr: &str, object: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();

        if stderr_lower.contains("cannot connect to the docker daemon")
            || stderr_lower.contains("is the docker daemon running")
            || stderr_lower.contains("error during connect")
        {
            return Error::Daemon {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("permission denied") || stderr_lower.contains("operation not permitted")
        {
            return Error::Permission {
                message: stderr.trim().to_string(),
            };
        }

        if stderr_lower.contains("no such container")
            || stderr_lower.contains("no such object")
            || stderr_lower.contains("no such network")
            || stderr_lower.contains("pull access denied")
            || stderr_lower.contains("manifest unknown")
            || (stderr_lower.contains("network") && stderr_lower.contains("not found"))
        {
            return Error::NotFound {
                name: object.unwrap_or("unknown").to_string(),
            };
        }

        if stderr_lower.contains("conflict")
            || stderr_lower.contains("already in use")
            || stderr_lower.contains("port is already allocated")
            || stderr_lower.contains("address already in use")
        {
            return Error::Conflict {
                message: stderr.trim().to_string(),
            };
        }

        Error::CommandFailed {
            message: format!(
                "docker command failed{}",
                object.map(|n| format!(" for {n}")).unwrap_or_default()
            ),
            stderr: stderr.trim().to_string(),
        }
    }

    /// Map into the reconciliation error taxonomy for a service.
    pub fn into_reconcile(self, service: &str) -> reconcile::Error {
        if self.category().is_fatal() {
            reconcile::Error::Unreachable {
                component: "docker".to_string(),
                message: self.to_string(),
            }
        } else {
            reconcile::Error::runtime(service, self.to_string())
        }
    }
}

/// Result type for docker operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_docker_output_daemon() {
        let err = Error::from_docker_output(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Daemon);
        assert!(err.category().is_fatal());
    }

    #[test]
    fn test_from_docker_output_not_found() {
        let err = Error::from_docker_output("Error: No such container: sonar-db", Some("sonar-db"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: sonar-db");
    }

    #[test]
    fn test_from_docker_output_conflict() {
        let err = Error::from_docker_output(
            "docker: Error response from daemon: Conflict. The container name \"/sonar-db\" is already in use",
            Some("sonar-db"),
        );
        assert_eq!(err.category(), ErrorCategory::Conflict);

        let err = Error::from_docker_output(
            "Bind for 0.0.0.0:9000 failed: port is already allocated",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn test_from_docker_output_permission() {
        let err = Error::from_docker_output(
            "permission denied while trying to connect to the Docker daemon socket",
            None,
        );
        assert_eq!(err.category(), ErrorCategory::Permission);
    }

    #[test]
    fn test_into_reconcile() {
        let fatal = Error::DockerNotFound.into_reconcile("db");
        assert!(matches!(fatal, reconcile::Error::Unreachable { .. }));

        let local = Error::Conflict {
            message: "port is already allocated".into(),
        }
        .into_reconcile("db");
        assert!(matches!(local, reconcile::Error::Runtime { ref service, .. } if service == "db"));
    }
}
