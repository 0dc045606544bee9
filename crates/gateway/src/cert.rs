//! Certificate expiry tracking and renewal through certbot.
//!
//! Issuance itself is certbot's job. This module reads the expiry certbot
//! reports and asks it for a new certificate over the webroot challenge.

use chrono::{DateTime, NaiveDateTime, Utc};
use reconcile::CertificateControl;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{Error, Result};

/// Certbot-compatible certificate agent.
pub struct CertbotAgent {
    program: String,
    email: String,
    webroot: PathBuf,
}

impl CertbotAgent {
    /// Create an agent that runs `program` (usually `certbot`).
    pub fn new(program: impl Into<String>, email: impl Into<String>, webroot: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            email: email.into(),
            webroot: webroot.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        log::debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| self.failure(format!("failed to execute: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(self.failure(if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn failure(&self, message: String) -> Error {
        Error::Agent {
            agent: self.program.clone(),
            message,
        }
    }

    /// Arguments that issue or renew the certificate for one domain.
    pub fn issue_args(&self, domain: &str) -> Vec<String> {
        [
            "certonly",
            "--webroot",
            "--webroot-path",
            &self.webroot.display().to_string(),
            "--domain",
            domain,
            "--cert-name",
            domain,
            "--email",
            &self.email,
            "--agree-tos",
            "--non-interactive",
            "--force-renewal",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Expiry certbot reports for a certificate name.
    pub fn read_expiry(&self, domain: &str) -> Result<Option<DateTime<Utc>>> {
        let args = ["certificates", "--cert-name", domain].map(String::from);
        let stdout = self.run(&args)?;
        Ok(parse_expiry(&stdout))
    }

    /// Request a certificate for a domain.
    pub fn request(&self, domain: &str) -> Result<()> {
        self.run(&self.issue_args(domain))?;
        log::info!("Certificate for {} issued", domain);
        Ok(())
    }
}

/// Parse the first `Expiry Date:` line of `certbot certificates`.
///
/// The line looks like `Expiry Date: 2025-03-01 12:00:00+00:00 (VALID: 60 days)`.
fn parse_expiry(output: &str) -> Option<DateTime<Utc>> {
    let line = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("Expiry Date:"))?;
    let stamp = line.trim().split(" (").next()?.trim();

    DateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S%:z")
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
        .ok()
}

impl CertificateControl for CertbotAgent {
    fn expiry(&self, domain: &str) -> reconcile::Result<Option<DateTime<Utc>>> {
        self.read_expiry(domain)
            .map_err(|e| reconcile::Error::certificate(domain, e.to_string()))
    }

    fn issue_or_renew(&self, domain: &str) -> reconcile::Result<()> {
        self.request(domain)
            .map_err(|e| reconcile::Error::certificate(domain, e.to_string()))
    }
}
