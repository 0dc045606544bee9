//! `ContainerRuntime` implementation over a docker [`Backend`].

use reconcile::{ContainerInfo, ContainerRuntime, ServiceSpec};
use std::time::Duration;

use crate::backend::Backend;
use crate::backend::cli::DockerCli;
use crate::error::{Error, Result};
use crate::types::{FINGERPRINT_LABEL, RETIRED_SUFFIX, STACK_LABEL, container_name, run_args};

/// Grace period before docker kills a stopping container
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Docker-backed container runtime for one stack.
///
/// Containers are named `{stack}-{service}` and labelled with the stack,
/// service and spec fingerprint. A container being replaced is parked as
/// `{stack}-{service}-previous` until its successor is healthy.
pub struct DockerRuntime {
    backend: Box<dyn Backend>,
    stack: String,
}

impl DockerRuntime {
    /// Create a runtime using the docker CLI.
    pub fn new(stack: impl Into<String>) -> Result<Self> {
        Ok(Self::with_backend(stack, Box::new(DockerCli::new()?)))
    }

    /// Create a runtime with a custom backend (for testing).
    pub fn with_backend(stack: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            stack: stack.into(),
        }
    }

    fn name(&self, service: &str) -> String {
        container_name(&self.stack, service)
    }

    fn retired_name(&self, service: &str) -> String {
        format!("{}{}", self.name(service), RETIRED_SUFFIX)
    }

    /// Remove a container, treating a missing one as removed.
    fn remove_if_present(&self, container: &str) -> Result<()> {
        match self.backend.remove(container) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    fn stop_if_present(&self, container: &str) -> Result<()> {
        match self.backend.stop(container, STOP_GRACE) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

fn lift<T>(service: &str, result: Result<T>) -> reconcile::Result<T> {
    result.map_err(|e: Error| e.into_reconcile(service))
}

impl ContainerRuntime for DockerRuntime {
    fn ping(&self) -> reconcile::Result<()> {
        lift("docker", self.backend.ping())
    }

    fn inspect(&self, service: &str) -> reconcile::Result<Option<ContainerInfo>> {
        let inspect = lift(service, self.backend.inspect(&self.name(service)))?;
        Ok(inspect.map(|i| ContainerInfo {
            status: i.status(),
            started_at: i.started_at(),
            fingerprint: i.label(FINGERPRINT_LABEL).map(str::to_string),
            id: i.id,
        }))
    }

    fn list_stack(&self) -> reconcile::Result<Vec<String>> {
        let label = format!("{}={}", STACK_LABEL, self.stack);
        let listed = lift("docker", self.backend.list_labelled(&label))?;

        // Nothing is retired between runs. One found here survived an
        // interrupted replacement and is listed as `<service>-previous`, which
        // no plan declares, so the orphan sweep removes it.
        let mut services: Vec<String> = listed
            .into_iter()
            .map(|(name, service)| {
                if name == self.retired_name(&service) {
                    log::warn!("{} was left behind by an interrupted replacement", name);
                    format!("{}{}", service, RETIRED_SUFFIX)
                } else {
                    service
                }
            })
            .collect();
        services.sort();
        services.dedup();
        Ok(services)
    }

    fn start(&self, spec: &ServiceSpec, fingerprint: &str) -> reconcile::Result<String> {
        let name = self.name(&spec.name);
        lift(&spec.name, self.remove_if_present(&name))?;
        lift(&spec.name, self.backend.ensure_network(&self.stack))?;

        let id = lift(
            &spec.name,
            self.backend.run(&run_args(&self.stack, spec, fingerprint)),
        )?;
        log::debug!("Started {} as {}", name, id);
        Ok(id)
    }

    fn stop(&self, service: &str) -> reconcile::Result<()> {
        let name = self.name(service);
        lift(service, self.stop_if_present(&name))?;
        lift(service, self.remove_if_present(&name))
    }

    fn retire(&self, service: &str) -> reconcile::Result<()> {
        let name = self.name(service);
        let retired = self.retired_name(service);
        lift(service, self.stop_if_present(&name))?;
        lift(service, self.remove_if_present(&retired))?;
        lift(service, self.backend.rename(&name, &retired))
    }

    fn restore(&self, service: &str) -> reconcile::Result<()> {
        let name = self.name(service);
        let retired = self.retired_name(service);
        lift(service, self.remove_if_present(&name))?;
        lift(service, self.backend.rename(&retired, &name))?;
        lift(service, self.backend.start(&name))
    }

    fn discard(&self, service: &str) -> reconcile::Result<()> {
        lift(service, self.remove_if_present(&self.retired_name(service)))
    }

    fn exec(
        &self,
        service: &str,
        command: &[String],
        timeout: Duration,
    ) -> reconcile::Result<bool> {
        match self.backend.exec(&self.name(service), command, timeout) {
            Ok(ok) => Ok(ok),
            Err(Error::Timeout { .. }) => Ok(false),
            Err(e) => Err(e.into_reconcile(service)),
        }
    }
}
