//! Health probes: exec inside the container, or HTTP GET from the host

use reconcile::{ContainerRuntime, Probe, Prober};
use std::sync::Arc;
use std::time::Duration;

/// Runs a stack's health probes
pub struct StackProber {
    runtime: Arc<dyn ContainerRuntime>,
}

impl StackProber {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

impl Prober for StackProber {
    fn probe(&self, service: &str, probe: &Probe, timeout: Duration) -> bool {
        match probe {
            Probe::Command(command) => match self.runtime.exec(service, command, timeout) {
                Ok(healthy) => healthy,
                Err(e) => {
                    log::debug!("Probe of {} failed: {}", service, e);
                    false
                }
            },
            Probe::Http(url) => http_ok(url, timeout),
        }
    }
}

/// GET a URL, true on a 2xx answer within the timeout
pub fn http_ok(url: &str, timeout: Duration) -> bool {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();
    match agent.get(url).call() {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            log::debug!("GET {} failed: {}", url, e);
            false
        }
    }
}
