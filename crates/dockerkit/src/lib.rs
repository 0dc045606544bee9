//! # dockerkit
//!
//! Container runtime capability for `reconcile`, backed by the docker CLI.
//!
//! This crate provides:
//! - [`DockerRuntime`], an implementation of [`reconcile::ContainerRuntime`]
//! - A [`Backend`](backend::Backend) trait over the `docker` commands it needs
//! - Categorized errors parsed from docker's stderr
//!
//! ## Example
//!
//! ```no_run
//! use dockerkit::DockerRuntime;
//! use reconcile::ContainerRuntime;
//!
//! let runtime = DockerRuntime::new("sonar").expect("docker not available");
//! runtime.ping().expect("daemon unreachable");
//! for service in runtime.list_stack().unwrap() {
//!     println!("{service}");
//! }
//! ```
//!
//! ## Naming
//!
//! Containers are named `{stack}-{service}` and attached to a network named
//! after the stack, with the service name as network alias. The labels in
//! [`types`] let a later run find its containers and the spec they came from.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod runtime;
pub mod types;

pub use backend::cli::DockerCli;
pub use error::{Error, ErrorCategory, Result};
pub use runtime::DockerRuntime;
pub use types::{Inspect, container_name, run_args};
