//! Wiring of the host's capabilities for a plan
//!
//! Docker for containers, the local filesystem, and the proxy, certificate
//! agent and alert webhook when the stack configures them.

pub mod fs;
pub mod probe;

use anyhow::Result;
use gateway::{CertbotAgent, ProxyManager, Reload, Renderer, WebhookAlert};
use reconcile::{Capabilities, ContainerRuntime, Plan, ProxySettings};
use std::sync::Arc;

use crate::paths;

/// Where certbot keeps live certificates when the stack does not say
const DEFAULT_LIVE_DIR: &str = "/etc/letsencrypt/live";

/// Capabilities plus the concrete proxy, which `plan --diff` renders with
pub struct Host {
    pub caps: Capabilities,
    pub proxy: Option<Arc<ProxyManager>>,
    pub prober: Arc<probe::StackProber>,
}

/// Connect to the host's collaborators for a plan
pub fn connect(plan: &Plan) -> Result<Host> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        dockerkit::DockerRuntime::new(&plan.name).map_err(|e| e.into_reconcile("docker"))?,
    );
    let prober = Arc::new(probe::StackProber::new(Arc::clone(&runtime)));
    let mut caps = Capabilities::new(runtime, Arc::new(fs::HostFilesystem));

    let proxy = plan.proxy.as_ref().map(|settings| Arc::new(proxy_manager(plan, settings)));
    if let Some(proxy) = &proxy {
        caps = caps.with_proxy(Arc::clone(proxy) as Arc<dyn reconcile::ProxyControl>);
    }

    if let Some(certs) = &plan.certificates {
        if plan.manages_certificates() {
            let webroot = paths::expand(&certs.webroot);
            caps = caps.with_certificates(Arc::new(CertbotAgent::new(
                &certs.agent,
                &certs.email,
                webroot,
            )));
        }
        if let Some(url) = &certs.alert_webhook {
            caps = caps.with_alerts(Arc::new(WebhookAlert::new(url, &plan.name)));
        }
    }

    Ok(Host {
        caps,
        proxy,
        prober,
    })
}

/// Build the proxy manager from the stack's proxy section
pub fn proxy_manager(plan: &Plan, settings: &ProxySettings) -> ProxyManager {
    let live_dir = plan
        .certificates
        .as_ref()
        .map_or(DEFAULT_LIVE_DIR, |c| c.live_dir.as_str());
    let webroot = settings
        .acme_webroot
        .as_deref()
        .or(plan.certificates.as_ref().map(|c| c.webroot.as_str()));

    let mut renderer = Renderer::new(&plan.name, paths::expand(live_dir));
    if let Some(webroot) = webroot {
        renderer = renderer.with_webroot(paths::expand(webroot));
    }

    let reload = match (&settings.reload_command, &settings.reload_url) {
        (Some(command), _) => Reload::Command(command.clone()),
        (None, Some(url)) => Reload::Http(url.clone()),
        (None, None) => Reload::None,
    };

    ProxyManager::new(paths::expand(&settings.config_path), renderer)
        .with_validate(settings.validate_command.clone())
        .with_reload(reload)
}
