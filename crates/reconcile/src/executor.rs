//! Action executor - applies reconcile actions with isolation, retry and rollback
//!
//! Orphan stops run first. Service actions are grouped per service and run
//! in dependency waves on a rayon pool; a failed or skipped service causes
//! its dependents to be skipped while independent services proceed. Proxy
//! and certificate actions run last, against the services that ended up
//! healthy.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::action::{ReconcileAction, StopReason};
use crate::cancel::CancelToken;
use crate::capability::{Alert, Capabilities, ContainerStatus, ProgressCallback};
use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::plan::Plan;
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::spec::Route;
use crate::state::RuntimeState;
use crate::units::format_duration;

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Number of services applied concurrently
    pub jobs: usize,
    /// Bound for each WaitHealthy
    pub health_timeout: Duration,
    /// Retry policy for CreateVolume and FixOwnership
    pub filesystem_retry: RetryConfig,
    /// Retry policy for certificate issuance and renewal
    pub certificate_retry: RetryConfig,
}

impl ExecuteOptions {
    /// Options taken from the plan's stack settings
    pub fn for_plan(plan: &Plan) -> Self {
        let policy = plan.certificate_policy;
        Self {
            jobs: plan.workers,
            health_timeout: plan.health_timeout,
            filesystem_retry: RetryConfig::filesystem(),
            certificate_retry: RetryConfig::certificate(
                policy.max_attempts,
                policy.backoff_base,
                policy.backoff_max,
            ),
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ActionOutcome {
    Succeeded,
    Failed { error: String },
    Skipped { reason: String },
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "ok",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// One executed (or skipped) action
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub action: ReconcileAction,
    pub outcome: ActionOutcome,
    pub elapsed: Duration,
}

/// Final outcome for a service that had actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ServiceOutcome {
    Succeeded,
    Failed { action: String, error: String },
    Skipped { reason: String },
}

/// Summary of an apply run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecuteReport {
    pub records: Vec<ActionRecord>,
    pub services: BTreeMap<String, ServiceOutcome>,
    pub alerts: Vec<Alert>,
    pub cancelled: bool,
}

impl ExecuteReport {
    /// No action failed and nothing was skipped
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.records.iter().all(|r| r.outcome.is_success())
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.services_where(|o| matches!(o, ServiceOutcome::Succeeded))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.services_where(|o| matches!(o, ServiceOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.services_where(|o| matches!(o, ServiceOutcome::Skipped { .. }))
    }

    /// Records whose outcome is a failure
    pub fn failures(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, ActionOutcome::Failed { .. }))
    }

    fn services_where(&self, pred: impl Fn(&ServiceOutcome) -> bool) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Everything the executor needs besides the actions
pub struct Executor<'a> {
    pub plan: &'a Plan,
    pub observed: &'a RuntimeState,
    pub caps: &'a Capabilities,
    pub monitor: &'a HealthMonitor,
    pub progress: &'a dyn ProgressCallback,
    pub cancel: &'a CancelToken,
    pub options: ExecuteOptions,
}

impl Executor<'_> {
    /// Execute actions in order and report per action and per service
    pub fn execute(&self, actions: Vec<ReconcileAction>) -> Result<ExecuteReport> {
        let mut report = ExecuteReport::default();

        let mut orphans = Vec::new();
        let mut per_service: HashMap<String, Vec<ReconcileAction>> = HashMap::new();
        let mut tail = Vec::new();
        for action in actions {
            if action.is_orphan_stop() {
                orphans.push(action);
            } else if let Some(service) = action.service() {
                per_service.entry(service.to_string()).or_default().push(action);
            } else {
                tail.push(action);
            }
        }

        for action in orphans {
            let record = if self.cancel.is_cancelled() {
                self.skip(action, "cancelled".to_string())
            } else {
                self.run(action, |a| self.stop_orphan(a.target()))
            };
            report.records.push(record);
        }

        self.run_services(per_service, &mut report)?;

        let routes = self.healthy_routes(&report);
        let mut renewed = 0;
        for action in tail {
            if self.cancel.is_cancelled() {
                report.records.push(self.skip(action, "cancelled".to_string()));
                continue;
            }
            let record = match action {
                ReconcileAction::IssueOrRenewCertificate { domain } => {
                    let record = self.run_certificate(domain, &routes);
                    match &record.outcome {
                        ActionOutcome::Succeeded => renewed += 1,
                        ActionOutcome::Failed { error } => {
                            report.alerts.push(self.escalate(record.action.target(), error));
                        }
                        ActionOutcome::Skipped { .. } => {}
                    }
                    record
                }
                other => self.run(other, |_| self.activate_proxy(&routes)),
            };
            report.records.push(record);
        }

        if renewed > 0
            && let Some(proxy) = &self.caps.proxy
            && let Err(e) = proxy.activate(&routes)
        {
            log::warn!("Proxy reload after certificate renewal failed: {}", e);
        }

        report.cancelled = self.cancel.is_cancelled();
        Ok(report)
    }

    fn run_services(
        &self,
        mut per_service: HashMap<String, Vec<ReconcileAction>>,
        report: &mut ExecuteReport,
    ) -> Result<()> {
        let mut waves: BTreeMap<usize, Vec<(String, Vec<ReconcileAction>)>> = BTreeMap::new();
        for spec in &self.plan.services {
            if let Some(actions) = per_service.remove(&spec.name) {
                let depth = self.plan.depth(&spec.name).unwrap_or(0);
                waves
                    .entry(depth)
                    .or_default()
                    .push((spec.name.clone(), actions));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
            .map_err(|e| Error::Unreachable {
                component: "executor thread pool".to_string(),
                message: e.to_string(),
            })?;

        for (_, wave) in waves {
            let mut ready = Vec::new();
            for (name, actions) in wave {
                match self.blocked_by(&name, report) {
                    Some(reason) => {
                        for action in actions {
                            report.records.push(self.skip(action, reason.clone()));
                        }
                        report
                            .services
                            .insert(name, ServiceOutcome::Skipped { reason });
                    }
                    None => ready.push((name, actions)),
                }
            }

            let results: Vec<(String, Vec<ActionRecord>, ServiceOutcome)> = pool.install(|| {
                ready
                    .into_par_iter()
                    .map(|(name, actions)| {
                        let (records, outcome) = self.run_service(&name, actions);
                        (name, records, outcome)
                    })
                    .collect()
            });

            for (name, records, outcome) in results {
                report.records.extend(records);
                report.services.insert(name, outcome);
            }
        }
        Ok(())
    }

    /// Reason a service must be skipped, if any dependency did not succeed
    fn blocked_by(&self, name: &str, report: &ExecuteReport) -> Option<String> {
        let spec = self.plan.service(name)?;
        spec.depends_on.iter().find_map(|dep| match report.services.get(dep) {
            Some(ServiceOutcome::Failed { .. }) => Some(format!("dependency '{}' failed", dep)),
            Some(ServiceOutcome::Skipped { .. }) => Some(format!("dependency '{}' was skipped", dep)),
            _ => None,
        })
    }

    /// Run one service's actions in order; the first failure skips the rest
    fn run_service(&self, name: &str, actions: Vec<ReconcileAction>) -> (Vec<ActionRecord>, ServiceOutcome) {
        let mut records = Vec::with_capacity(actions.len());
        let mut outcome = ServiceOutcome::Succeeded;
        let mut retired = false;

        let mut remaining = actions.into_iter();
        while let Some(action) = remaining.next() {
            if self.cancel.is_cancelled() {
                records.push(self.skip(action, "cancelled".to_string()));
                records.extend(remaining.by_ref().map(|a| self.skip(a, "cancelled".to_string())));
                outcome = ServiceOutcome::Skipped {
                    reason: "cancelled".to_string(),
                };
                break;
            }

            let kind = action.kind();
            let record = self.run(action, |a| self.apply(a, &mut retired));
            let failed = match &record.outcome {
                ActionOutcome::Failed { error } => Some(error.clone()),
                _ => None,
            };
            records.push(record);

            if let Some(error) = failed {
                let reason = format!("{} failed", kind);
                records.extend(remaining.by_ref().map(|a| self.skip(a, reason.clone())));
                outcome = ServiceOutcome::Failed {
                    action: kind.to_string(),
                    error,
                };
                break;
            }
        }

        if retired {
            self.finish_replacement(name, outcome == ServiceOutcome::Succeeded);
        }
        (records, outcome)
    }

    fn apply(&self, action: &ReconcileAction, retired: &mut bool) -> Result<()> {
        let fs = self.caps.filesystem.as_ref();
        let runtime = self.caps.runtime.as_ref();

        match action {
            ReconcileAction::CreateVolume {
                path, permissions, ..
            } => with_retry(
                &self.options.filesystem_retry,
                Some(&LogCallback("CreateVolume")),
                || fs.create_dir_all(path, *permissions),
            ),
            ReconcileAction::FixOwnership {
                path,
                uid,
                gid,
                permissions,
                policy,
                ..
            } => with_retry(
                &self.options.filesystem_retry,
                Some(&LogCallback("FixOwnership")),
                || {
                    fs.set_owner(path, *uid, *gid, *policy)?;
                    fs.set_permissions(path, *permissions)
                },
            ),
            ReconcileAction::StopService {
                service,
                reason: StopReason::Replace,
            } => {
                runtime.retire(service)?;
                *retired = true;
                self.monitor.stop(service);
                Ok(())
            }
            ReconcileAction::StopService { service, .. } => self.stop_orphan(service),
            ReconcileAction::StartService { service } => {
                let spec = self
                    .plan
                    .service(service)
                    .ok_or_else(|| Error::runtime(service, "service is not declared"))?;
                let id = runtime.start(spec, &spec.fingerprint())?;
                log::debug!("{} started as {}", service, id);
                self.monitor.restart(service);
                Ok(())
            }
            ReconcileAction::WaitHealthy { service } => {
                self.monitor
                    .wait_healthy(service, self.options.health_timeout, self.cancel)
            }
            ReconcileAction::ReloadProxy | ReconcileAction::IssueOrRenewCertificate { .. } => Ok(()),
        }
    }

    /// Discard the previous container on success, bring it back otherwise
    fn finish_replacement(&self, service: &str, succeeded: bool) {
        let runtime = self.caps.runtime.as_ref();
        if succeeded {
            if let Err(e) = runtime.discard(service) {
                log::warn!("Could not remove previous container of {}: {}", service, e);
            }
            return;
        }

        log::warn!("Restoring previous container of {}", service);
        if runtime.inspect(service).ok().flatten().is_some()
            && let Err(e) = runtime.stop(service)
        {
            log::warn!("Could not stop failed replacement of {}: {}", service, e);
        }
        match runtime.restore(service) {
            Ok(()) => self.monitor.restart(service),
            Err(e) => log::error!("Could not restore previous container of {}: {}", service, e),
        }
    }

    fn stop_orphan(&self, service: &str) -> Result<()> {
        self.caps.runtime.stop(service)?;
        self.monitor.stop(service);
        Ok(())
    }

    fn activate_proxy(&self, routes: &[Route]) -> Result<()> {
        let proxy = self.caps.proxy.as_ref().ok_or_else(|| Error::Unreachable {
            component: "proxy".to_string(),
            message: "no proxy configured".to_string(),
        })?;
        proxy.activate(routes)
    }

    fn run_certificate(&self, domain: String, routes: &[Route]) -> ActionRecord {
        let served = routes.iter().any(|r| r.hostname == domain);
        let action = ReconcileAction::IssueOrRenewCertificate {
            domain: domain.clone(),
        };
        if !served {
            return self.skip(action, format!("no healthy service serves {}", domain));
        }
        self.run(action, |_| self.renew(&domain))
    }

    fn renew(&self, domain: &str) -> Result<()> {
        let certs = self
            .caps
            .certificates
            .as_ref()
            .ok_or_else(|| Error::certificate(domain, "no certificate agent configured"))?;
        with_retry(
            &self.options.certificate_retry,
            Some(&LogCallback(domain)),
            || certs.issue_or_renew(domain),
        )
    }

    fn escalate(&self, domain: &str, error: &str) -> Alert {
        let alert = Alert::new(
            format!("certificate renewal failed for {}", domain),
            format!(
                "gave up after {} attempts: {}",
                self.options.certificate_retry.max_attempts, error
            ),
        );
        log::error!("{}: {}", alert.subject, alert.message);
        if let Some(sink) = &self.caps.alerts
            && let Err(e) = sink.alert(&alert)
        {
            log::warn!("Could not deliver alert: {}", e);
        }
        alert
    }

    /// Routes of services that are healthy after execution
    ///
    /// Services this run succeeded with, plus services that needed no
    /// action and were observed running.
    fn healthy_routes(&self, report: &ExecuteReport) -> Vec<Route> {
        self.plan
            .routes()
            .into_iter()
            .filter(|route| match report.services.get(&route.service) {
                Some(outcome) => *outcome == ServiceOutcome::Succeeded,
                None => self.observed.service(&route.service).status == ContainerStatus::Running,
            })
            .collect()
    }

    /// Run and log one action
    fn run(&self, action: ReconcileAction, f: impl FnOnce(&ReconcileAction) -> Result<()>) -> ActionRecord {
        self.progress.on_action_start(&action);
        let started = Instant::now();
        let outcome = match f(&action) {
            Ok(()) => ActionOutcome::Succeeded,
            Err(e) => ActionOutcome::Failed {
                error: e.to_string(),
            },
        };
        let elapsed = started.elapsed();

        match &outcome {
            ActionOutcome::Failed { error } => log::warn!(
                "{} {} {} in {}: {}",
                action.kind(),
                action.target(),
                outcome.label(),
                format_duration(elapsed),
                error
            ),
            _ => log::info!(
                "{} {} {} in {}",
                action.kind(),
                action.target(),
                outcome.label(),
                format_duration(elapsed)
            ),
        }

        self.progress.on_action_complete(&action, &outcome, elapsed);
        ActionRecord {
            action,
            outcome,
            elapsed,
        }
    }

    fn skip(&self, action: ReconcileAction, reason: String) -> ActionRecord {
        log::info!("{} {} skipped: {}", action.kind(), action.target(), reason);
        let outcome = ActionOutcome::Skipped { reason };
        self.progress
            .on_action_complete(&action, &outcome, Duration::ZERO);
        ActionRecord {
            action,
            outcome,
            elapsed: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{Filesystem, NoProgress, PathStat};
    use crate::health::HealthState;
    use crate::reconciler::reconcile;
    use crate::retry::Backoff;
    use crate::spec::fixtures::{service, volume};
    use crate::spec::{PublicEndpoint, ServiceSpec};
    use crate::state::observe;
    use crate::testing::{FakeAlerts, FakeCerts, FakeFs, FakeProber, FakeProxy, FakeRuntime};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        fs: Arc<FakeFs>,
        prober: Arc<FakeProber>,
        proxy: Arc<FakeProxy>,
        certs: Arc<FakeCerts>,
        alerts: Arc<FakeAlerts>,
        caps: Capabilities,
    }

    impl Harness {
        fn new() -> Self {
            let runtime = Arc::new(FakeRuntime::new());
            let fs = Arc::new(FakeFs::new());
            let proxy = Arc::new(FakeProxy::default());
            let certs = Arc::new(FakeCerts::default());
            let alerts = Arc::new(FakeAlerts::default());
            let caps = Capabilities::new(runtime.clone(), fs.clone())
                .with_proxy(proxy.clone())
                .with_certificates(certs.clone())
                .with_alerts(alerts.clone());
            Self {
                runtime,
                fs,
                prober: Arc::new(FakeProber::healthy()),
                proxy,
                certs,
                alerts,
                caps,
            }
        }

        fn options(plan: &Plan) -> ExecuteOptions {
            let quick = RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                backoff: Backoff::Linear,
                max_delay: Duration::from_millis(5),
            };
            ExecuteOptions {
                jobs: plan.workers,
                health_timeout: Duration::from_secs(5),
                filesystem_retry: RetryConfig {
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    ..RetryConfig::filesystem()
                },
                certificate_retry: quick,
            }
        }

        /// Observe, reconcile and execute once
        fn apply(&self, plan: &Plan, monitor: &HealthMonitor) -> ExecuteReport {
            let observed = observe(plan, &self.caps).unwrap();
            let actions = reconcile(plan, &observed);
            Executor {
                plan,
                observed: &observed,
                caps: &self.caps,
                monitor,
                progress: &NoProgress,
                cancel: &CancelToken::new(),
                options: Self::options(plan),
            }
            .execute(actions)
            .unwrap()
        }

        fn pending(&self, plan: &Plan) -> Vec<String> {
            let observed = observe(plan, &self.caps).unwrap();
            reconcile(plan, &observed)
                .iter()
                .map(ToString::to_string)
                .collect()
        }
    }

    fn public(mut spec: ServiceSpec, hostname: &str, tls: bool) -> ServiceSpec {
        spec.public = Some(PublicEndpoint {
            hostname: hostname.to_string(),
            port: 9000,
            tls,
        });
        spec
    }

    fn sonar_plan() -> Plan {
        let mut db = service("db", &[]);
        db.volumes.push(volume("/srv/postgresql", 999));
        let app = public(service("app", &["db"]), "sonar.example.com", false);
        let mut plan = Plan::from_services("sonar", vec![db, app]).unwrap();
        plan.proxy = Some(crate::plan::ProxySettings {
            config_path: "/etc/nginx/conf.d/sonar.conf".into(),
            validate_command: vec!["true".into()],
            reload_command: Some(vec!["true".into()]),
            reload_url: None,
            acme_webroot: None,
        });
        plan
    }

    #[test]
    fn test_fresh_apply_then_idempotent() {
        let h = Harness::new();
        let plan = sonar_plan();
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);
        assert!(report.is_success(), "{:?}", report.records);
        assert_eq!(report.succeeded(), vec!["app", "db"]);
        assert_eq!(report.records.len(), 7);
        assert_eq!(
            h.fs.stat(Path::new("/srv/postgresql")).unwrap(),
            Some(PathStat {
                uid: 999,
                gid: 999,
                mode: 0o750
            })
        );
        assert_eq!(h.proxy.activations.lock().unwrap().len(), 1);
        assert_eq!(monitor.state("app"), Some(HealthState::Healthy));

        assert!(h.pending(&plan).is_empty());
    }

    #[test]
    fn test_failed_subtree_is_isolated() {
        let h = Harness::new();
        let a = service("a", &[]);
        let b = service("b", &["a"]);
        let c = public(service("c", &[]), "c.example.com", false);
        let mut plan = Plan::from_services("t", vec![a, b, c]).unwrap();
        plan.proxy = sonar_plan().proxy;
        h.runtime.fail_start("a");
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert!(!report.is_success());
        assert_eq!(report.failed(), vec!["a"]);
        assert_eq!(report.skipped(), vec!["b"]);
        assert_eq!(report.succeeded(), vec!["c"]);
        assert_eq!(
            report.services["b"],
            ServiceOutcome::Skipped {
                reason: "dependency 'a' failed".into()
            }
        );
        assert_eq!(monitor.state("c"), Some(HealthState::Healthy));

        let activated = h.proxy.activations.lock().unwrap();
        assert_eq!(activated[0].len(), 1);
        assert_eq!(activated[0][0].service, "c");
    }

    #[test]
    fn test_filesystem_errors_are_retried() {
        let h = Harness::new();
        let plan = sonar_plan();
        h.fs.fail_transiently("/srv/postgresql", 2);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);
        assert!(report.is_success());
        assert_eq!(h.fs.chown_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_ownership_fix_survives_three_transient_failures() {
        let h = Harness::new();
        let plan = sonar_plan();
        h.fs.fail_transiently("/srv/postgresql", 3);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);
        assert!(report.is_success(), "{:?}", report.services);
        assert_eq!(h.fs.chown_calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.succeeded(), vec!["app", "db"]);
    }

    #[test]
    fn test_ownership_fix_gives_up_after_three_retries() {
        let h = Harness::new();
        let plan = sonar_plan();
        h.fs.fail_transiently("/srv/postgresql", 4);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);
        assert_eq!(h.fs.chown_calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.failed(), vec!["db"]);
        assert_eq!(report.skipped(), vec!["app"]);
    }

    #[test]
    fn test_failed_replacement_restores_previous() {
        let h = Harness::new();
        let plan = Plan::from_services("t", vec![service("db", &[])]).unwrap();
        h.runtime.seed_running("db", "0000000000000000");
        h.runtime.fail_start("db");
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert_eq!(report.failed(), vec!["db"]);
        assert_eq!(
            h.runtime.calls(),
            vec!["retire db", "start db", "restore db"]
        );
        let db = h.runtime.container("db").unwrap();
        assert_eq!(db.status, ContainerStatus::Running);
        assert_eq!(db.fingerprint.as_deref(), Some("0000000000000000"));
    }

    #[test]
    fn test_successful_replacement_discards_previous() {
        let h = Harness::new();
        let plan = Plan::from_services("t", vec![service("db", &[])]).unwrap();
        h.runtime.seed_running("db", "0000000000000000");
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert!(report.is_success());
        assert_eq!(h.runtime.calls(), vec!["retire db", "start db", "discard db"]);
        assert_eq!(
            h.runtime.container("db").unwrap().fingerprint,
            Some(plan.services[0].fingerprint())
        );
    }

    #[test]
    fn test_unhealthy_start_is_reported() {
        let h = Harness::new();
        let plan = Plan::from_services("t", vec![service("app", &[])]).unwrap();
        h.prober.set("app", false);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        match &report.services["app"] {
            ServiceOutcome::Failed { action, error } => {
                assert_eq!(action, "WaitHealthy");
                assert!(error.contains("failed"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(monitor.state("app"), Some(HealthState::Failed));
    }

    #[test]
    fn test_orphans_stopped() {
        let h = Harness::new();
        let plan = Plan::from_services("t", vec![service("db", &[])]).unwrap();
        h.runtime.seed_running("db", &plan.services[0].fingerprint());
        h.runtime.seed_running("legacy", "ffff");
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert!(report.is_success());
        assert_eq!(h.runtime.calls(), vec!["stop legacy"]);
        assert!(h.runtime.container("legacy").is_none());
    }

    #[test]
    fn test_cancelled_run_skips_everything() {
        let h = Harness::new();
        let plan = sonar_plan();
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());
        let observed = observe(&plan, &h.caps).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = Executor {
            plan: &plan,
            observed: &observed,
            caps: &h.caps,
            monitor: &monitor,
            progress: &NoProgress,
            cancel: &cancel,
            options: Harness::options(&plan),
        }
        .execute(reconcile(&plan, &observed))
        .unwrap();

        assert!(report.cancelled);
        assert!(!report.is_success());
        assert_eq!(report.skipped(), vec!["app", "db"]);
        assert_eq!(
            report.services["db"],
            ServiceOutcome::Skipped {
                reason: "cancelled".into()
            }
        );
        assert!(report.records.iter().all(|r| !r.outcome.is_success()));
        assert!(h.runtime.calls().is_empty());
    }

    #[test]
    fn test_certificate_renewal_retries_then_escalates() {
        let h = Harness::new();
        let mut plan = sonar_plan();
        plan.services[1].public.as_mut().unwrap().tls = true;
        plan.certificates = Some(crate::plan::CertificateSettings {
            email: "ops@example.com".into(),
            webroot: "/var/www/acme".into(),
            renew_before: "30d".into(),
            max_attempts: 3,
            backoff_base: "1ms".into(),
            backoff_max: "5ms".into(),
            agent: "certbot".into(),
            live_dir: "/etc/letsencrypt/live".into(),
            alert_webhook: None,
        });
        h.certs.fail_next(10);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert_eq!(h.certs.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(h.alerts.raised.lock().unwrap().len(), 1);
        assert_eq!(report.succeeded(), vec!["app", "db"]);
        assert!(!report.is_success());
    }

    #[test]
    fn test_certificate_renewal_reactivates_proxy() {
        let h = Harness::new();
        let mut plan = sonar_plan();
        plan.services[1].public.as_mut().unwrap().tls = true;
        plan.certificates = Some(crate::plan::CertificateSettings {
            email: "ops@example.com".into(),
            webroot: "/var/www/acme".into(),
            renew_before: "30d".into(),
            max_attempts: 3,
            backoff_base: "1ms".into(),
            backoff_max: "5ms".into(),
            agent: "certbot".into(),
            live_dir: "/etc/letsencrypt/live".into(),
            alert_webhook: None,
        });
        h.certs.fail_next(1);
        let monitor = HealthMonitor::start(&plan.services, h.prober.clone());

        let report = h.apply(&plan, &monitor);

        assert!(report.is_success(), "{:?}", report.records);
        assert_eq!(h.certs.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(h.proxy.activations.lock().unwrap().len(), 2);
        assert!(h.pending(&plan).is_empty());
    }
}
