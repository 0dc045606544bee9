//! Backend abstraction for docker operations.
//!
//! The [`Backend`] trait is the thin layer over the docker CLI, so the
//! runtime logic above it can be tested with a recording mock.

pub mod cli;

use crate::error::Result;
use crate::types::Inspect;
use std::time::Duration;

/// Backend trait for docker operations.
pub trait Backend: Send + Sync {
    /// Check the daemon answers.
    fn ping(&self) -> Result<()>;

    /// Inspect a container, `None` if it does not exist.
    fn inspect(&self, container: &str) -> Result<Option<Inspect>>;

    /// Names and service labels of all containers carrying a label.
    fn list_labelled(&self, label: &str) -> Result<Vec<(String, String)>>;

    /// Create a bridge network unless it exists.
    fn ensure_network(&self, name: &str) -> Result<()>;

    /// Run `docker run` with prepared arguments, returning the container id.
    fn run(&self, args: &[String]) -> Result<String>;

    /// Start an existing container.
    fn start(&self, container: &str) -> Result<()>;

    /// Stop a container, killing it after the grace period.
    fn stop(&self, container: &str, grace: Duration) -> Result<()>;

    /// Remove a container (forcefully).
    fn remove(&self, container: &str) -> Result<()>;

    /// Rename a container.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Run a command in a container, true on exit status 0.
    fn exec(&self, container: &str, command: &[String], timeout: Duration) -> Result<bool>;
}
