//! Route rendering into an nginx configuration.
//!
//! Output is deterministic for a given route set and certificate state, so
//! the active file can be compared by hash for drift.

use reconcile::Route;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Address the proxy uses to reach published container ports
const UPSTREAM_HOST: &str = "127.0.0.1";

/// Renders server blocks for a stack's public routes.
#[derive(Debug, Clone)]
pub struct Renderer {
    stack: String,
    /// Directory with one `<domain>/fullchain.pem` + `privkey.pem` per domain
    live_dir: PathBuf,
    /// Directory serving `/.well-known/acme-challenge/`
    webroot: Option<PathBuf>,
}

impl Renderer {
    /// Create a renderer for a stack.
    pub fn new(stack: impl Into<String>, live_dir: impl Into<PathBuf>) -> Self {
        Self {
            stack: stack.into(),
            live_dir: live_dir.into(),
            webroot: None,
        }
    }

    /// Serve ACME HTTP-01 challenges from this directory.
    #[must_use]
    pub fn with_webroot(mut self, webroot: impl Into<PathBuf>) -> Self {
        self.webroot = Some(webroot.into());
        self
    }

    /// Certificate and key paths for a domain.
    pub fn certificate_paths(&self, hostname: &str) -> (PathBuf, PathBuf) {
        let dir = self.live_dir.join(hostname);
        (dir.join("fullchain.pem"), dir.join("privkey.pem"))
    }

    fn certificate_ready(&self, hostname: &str) -> bool {
        let (cert, key) = self.certificate_paths(hostname);
        cert.is_file() && key.is_file()
    }

    /// Render the configuration for a set of routes.
    ///
    /// A TLS route whose certificate has not been issued yet is served over
    /// plain HTTP so the ACME challenge can complete; the HTTPS block appears
    /// on the next render once the files exist.
    pub fn render(&self, routes: &[Route]) -> String {
        let mut sorted: Vec<&Route> = routes.iter().collect();
        sorted.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let mut out = format!(
            "# Managed by keel for stack {}. Changes are overwritten.\n",
            self.stack
        );
        for route in sorted {
            out.push('\n');
            if route.tls && self.certificate_ready(&route.hostname) {
                self.render_redirect(&mut out, route);
                out.push('\n');
                self.render_https(&mut out, route);
            } else {
                if route.tls {
                    log::debug!("No certificate for {} yet, serving HTTP", route.hostname);
                }
                self.render_http(&mut out, route);
            }
        }
        out
    }

    fn render_http(&self, out: &mut String, route: &Route) {
        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen 80;");
        let _ = writeln!(out, "    server_name {};", route.hostname);
        self.render_challenge(out);
        render_upstream(out, route);
        let _ = writeln!(out, "}}");
    }

    fn render_redirect(&self, out: &mut String, route: &Route) {
        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen 80;");
        let _ = writeln!(out, "    server_name {};", route.hostname);
        self.render_challenge(out);
        let _ = writeln!(out);
        let _ = writeln!(out, "    location / {{");
        let _ = writeln!(out, "        return 301 https://$host$request_uri;");
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
    }

    fn render_https(&self, out: &mut String, route: &Route) {
        let (cert, key) = self.certificate_paths(&route.hostname);
        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen 443 ssl;");
        let _ = writeln!(out, "    server_name {};", route.hostname);
        let _ = writeln!(out);
        let _ = writeln!(out, "    ssl_certificate {};", display(&cert));
        let _ = writeln!(out, "    ssl_certificate_key {};", display(&key));
        render_upstream(out, route);
        let _ = writeln!(out, "}}");
    }

    fn render_challenge(&self, out: &mut String) {
        if let Some(webroot) = &self.webroot {
            let _ = writeln!(out);
            let _ = writeln!(out, "    location /.well-known/acme-challenge/ {{");
            let _ = writeln!(out, "        root {};", display(webroot));
            let _ = writeln!(out, "    }}");
        }
    }
}

fn render_upstream(out: &mut String, route: &Route) {
    let _ = writeln!(out);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        proxy_pass http://{}:{};", UPSTREAM_HOST, route.port);
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(
        out,
        "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
    );
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
    let _ = writeln!(out, "    }}");
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
