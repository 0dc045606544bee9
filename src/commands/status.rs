//! `keel status` - observed state and live health

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use reconcile::{ContainerStatus, HealthMonitor, HealthState, Plan, Prober, RuntimeState, observe};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::Outcome;
use crate::Context;
use crate::cli::StatusArgs;
use crate::{config, host, ui};

/// Upper bound on waiting for first probe results
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct StatusReport {
    stack: String,
    observed_at: DateTime<Utc>,
    services: Vec<ServiceStatus>,
    volumes: Vec<VolumeStatus>,
    proxy_in_sync: Option<bool>,
    certificates: Vec<CertificateStatus>,
    orphans: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ServiceStatus {
    name: String,
    status: ContainerStatus,
    health: HealthState,
    container_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct VolumeStatus {
    service: String,
    path: String,
    exists: bool,
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<String>,
    /// Owner and mode match the declaration
    ok: bool,
}

#[derive(Debug, Serialize)]
struct CertificateStatus {
    domain: String,
    expires_at: Option<DateTime<Utc>>,
    days_left: Option<i64>,
}

impl StatusReport {
    fn build(plan: &Plan, observed: &RuntimeState, health: &BTreeMap<String, HealthState>) -> Self {
        let services = plan
            .services
            .iter()
            .map(|spec| {
                let service = observed.service(&spec.name);
                ServiceStatus {
                    name: spec.name.clone(),
                    status: service.status,
                    health: health.get(&spec.name).copied().unwrap_or(HealthState::Stopped),
                    container_id: service.container_id,
                    started_at: service.started_at,
                }
            })
            .collect();

        let volumes = plan
            .services
            .iter()
            .flat_map(|spec| spec.volumes.iter().map(move |v| (spec, v)))
            .map(|(spec, volume)| {
                let stat = observed.volume(&volume.host_path);
                VolumeStatus {
                    service: spec.name.clone(),
                    path: volume.host_path.display().to_string(),
                    exists: stat.is_some(),
                    uid: stat.map(|s| s.uid),
                    gid: stat.map(|s| s.gid),
                    mode: stat.map(|s| format!("{:04o}", s.mode & 0o7777)),
                    ok: stat.is_some_and(|s| {
                        s.uid == volume.uid
                            && s.gid == volume.gid
                            && s.mode & 0o7777 == volume.permissions
                    }),
                }
            })
            .collect();

        let certificates = observed
            .certificates
            .iter()
            .map(|(domain, expires)| CertificateStatus {
                domain: domain.clone(),
                expires_at: *expires,
                days_left: expires.map(|e| (e - observed.observed_at).num_days()),
            })
            .collect();

        Self {
            stack: plan.name.clone(),
            observed_at: observed.observed_at,
            services,
            volumes,
            proxy_in_sync: observed.proxy_in_sync,
            certificates,
            orphans: observed.orphans.clone(),
        }
    }
}

pub fn run(ctx: &Context, args: &StatusArgs) -> Result<Outcome> {
    let stack = config::load(ctx.file.as_deref())?;
    let plan = &stack.plan;
    let host = host::connect(plan)?;
    let observed = observe(plan, &host.caps).context("Could not observe host state")?;

    let prober: Arc<dyn Prober> = host.prober.clone();
    let mut monitor = HealthMonitor::start(&plan.services, prober);
    for (name, service) in &observed.services {
        if service.status != ContainerStatus::Stopped {
            monitor.restart(name);
        }
    }
    monitor.wait_settled(SETTLE_TIMEOUT);
    let health = monitor.snapshot();
    monitor.shutdown();

    let report = StatusReport::build(plan, &observed, &health);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display(ctx, &report);
    }
    Ok(Outcome::Success)
}

fn health_label(state: HealthState) -> String {
    let text = state.to_string();
    match state {
        HealthState::Healthy => text.green().to_string(),
        HealthState::Starting => text.yellow().to_string(),
        HealthState::Unhealthy | HealthState::Failed => text.red().to_string(),
        HealthState::Stopped => text.dimmed().to_string(),
    }
}

fn display(ctx: &Context, report: &StatusReport) {
    ui::header(&format!("Stack '{}'", report.stack));

    ui::section("Services");
    for service in &report.services {
        let symbol = match service.status {
            ContainerStatus::Running => "●".green(),
            ContainerStatus::Unhealthy => "●".red(),
            ContainerStatus::Stopped => "○".dimmed(),
        };
        println!(
            "  {} {:<20} {}",
            symbol,
            service.name.bold(),
            health_label(service.health)
        );
        if ctx.verbose > 0
            && let Some(id) = &service.container_id
        {
            ui::dim(&format!(
                "    {} started {}",
                id.chars().take(12).collect::<String>(),
                service
                    .started_at
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
            ));
        }
    }
    for orphan in &report.orphans {
        println!("  {} {:<20} {}", "!".yellow(), orphan, "not declared".yellow());
    }

    if !report.volumes.is_empty() {
        ui::section("Volumes");
        for volume in &report.volumes {
            let state = if !volume.exists {
                "missing".red().to_string()
            } else {
                let owner = format!(
                    "{}:{} {}",
                    volume.uid.unwrap_or_default(),
                    volume.gid.unwrap_or_default(),
                    volume.mode.as_deref().unwrap_or("-")
                );
                if volume.ok {
                    owner.green().to_string()
                } else {
                    format!("{} (drift)", owner).yellow().to_string()
                }
            };
            println!("  {} {} {}", volume.path, volume.service.dimmed(), state);
        }
    }

    if let Some(in_sync) = report.proxy_in_sync {
        ui::section("Proxy");
        if in_sync {
            ui::success("Configuration in sync");
        } else {
            ui::warn("Configuration drifted, run apply");
        }
    }

    if !report.certificates.is_empty() {
        ui::section("Certificates");
        for cert in &report.certificates {
            let expiry = match (cert.expires_at, cert.days_left) {
                (Some(at), Some(days)) => {
                    let text = format!("expires {} ({} days)", at.format("%Y-%m-%d"), days);
                    if days < 30 {
                        text.yellow().to_string()
                    } else {
                        text.green().to_string()
                    }
                }
                _ => "not issued".red().to_string(),
            };
            ui::kv(&cert.domain, &expiry);
        }
    }
    println!();
}
