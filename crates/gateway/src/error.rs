//! Error types for proxy and certificate operations.
//!
//! Errors are categorized so the caller can tell a rejected configuration
//! from a proxy that could not be reloaded or an agent that failed.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of gateway errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The proxy rejected the rendered configuration.
    Validation,
    /// The proxy did not accept the reload.
    Reload,
    /// HTTP endpoint unreachable or returned an error status.
    Network,
    /// The certificate agent failed.
    Agent,
    /// Reading or writing configuration files failed.
    Io,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Agent)
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Validation => "Proxy configuration rejected",
            Self::Reload => "Proxy reload failed",
            Self::Network => "Network connectivity issue",
            Self::Agent => "Certificate agent failed",
            Self::Io => "File access failed",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Validation => "Run the validate command by hand to see the offending line",
            Self::Reload => "Check the proxy is running and its admin endpoint is reachable",
            Self::Network => "Check the endpoint URL and that the host is reachable",
            Self::Agent => "Check the agent's log and the ACME rate limits",
            Self::Io => "Check the configuration directory exists and is writable",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while managing the proxy and certificates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validate command rejected the candidate configuration.
    #[error("configuration rejected by `{command}`: {stderr}")]
    Validation {
        /// Validate command line.
        command: String,
        /// Standard error output.
        stderr: String,
    },

    /// Reload failed; the previous configuration was put back.
    #[error("reload failed: {message}")]
    Reload {
        /// Error message.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {message}")]
    Http {
        /// Error message.
        message: String,
        /// HTTP status code if available.
        status: Option<u16>,
    },

    /// Certificate agent failed.
    #[error("{agent} failed: {message}")]
    Agent {
        /// Agent executable.
        agent: String,
        /// Error message or stderr.
        message: String,
    },

    /// IO error during file operations.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the error category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Validation { .. } => ErrorCategory::Validation,
            Error::Reload { .. } => ErrorCategory::Reload,
            Error::Http { .. } => ErrorCategory::Network,
            Error::Agent { .. } => ErrorCategory::Agent,
            Error::Io { .. } => ErrorCategory::Io,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Http {
                message: format!("HTTP {}", code),
                status: Some(code),
            },
            other => Self::Http {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
