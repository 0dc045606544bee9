//! Reconciler - diffs the plan against observed state
//!
//! Pure function of `(Plan, RuntimeState)`. Actions come out in execution
//! order: orphan stops, then per service in topological order volume fixes,
//! (re)start and WaitHealthy, then the proxy reload and certificate work.

use chrono::Duration as ChronoDuration;

use crate::action::{ReconcileAction, StopReason};
use crate::capability::ContainerStatus;
use crate::plan::Plan;
use crate::spec::ServiceSpec;
use crate::state::RuntimeState;

/// Compute the ordered actions that bring `observed` to the plan
pub fn reconcile(plan: &Plan, observed: &RuntimeState) -> Vec<ReconcileAction> {
    let mut actions: Vec<ReconcileAction> = observed
        .orphans
        .iter()
        .map(|name| ReconcileAction::StopService {
            service: name.clone(),
            reason: StopReason::Orphan,
        })
        .collect();

    for spec in &plan.services {
        volume_actions(spec, observed, &mut actions);
        service_actions(spec, observed, &mut actions);
    }

    if plan.manages_proxy() && (!actions.is_empty() || observed.proxy_in_sync != Some(true)) {
        actions.push(ReconcileAction::ReloadProxy);
    }

    if plan.manages_certificates() {
        let threshold = ChronoDuration::from_std(plan.certificate_policy.renew_before)
            .unwrap_or_else(|_| ChronoDuration::days(30));
        for domain in plan.tls_domains() {
            let due = match observed.certificates.get(&domain).copied().flatten() {
                Some(expires) => expires - observed.observed_at < threshold,
                None => true,
            };
            if due {
                actions.push(ReconcileAction::IssueOrRenewCertificate { domain });
            }
        }
    }

    actions
}

fn volume_actions(spec: &ServiceSpec, observed: &RuntimeState, actions: &mut Vec<ReconcileAction>) {
    for volume in &spec.volumes {
        let fix = ReconcileAction::FixOwnership {
            service: spec.name.clone(),
            path: volume.host_path.clone(),
            uid: volume.uid,
            gid: volume.gid,
            permissions: volume.permissions,
            policy: volume.policy,
        };
        match observed.volume(&volume.host_path) {
            None => {
                actions.push(ReconcileAction::CreateVolume {
                    service: spec.name.clone(),
                    path: volume.host_path.clone(),
                    permissions: volume.permissions,
                });
                actions.push(fix);
            }
            Some(stat)
                if stat.uid != volume.uid
                    || stat.gid != volume.gid
                    || stat.mode & 0o7777 != volume.permissions =>
            {
                actions.push(fix);
            }
            Some(_) => {}
        }
    }
}

fn service_actions(spec: &ServiceSpec, observed: &RuntimeState, actions: &mut Vec<ReconcileAction>) {
    let current = observed.service(&spec.name);
    let start = ReconcileAction::StartService {
        service: spec.name.clone(),
    };
    let replace = ReconcileAction::StopService {
        service: spec.name.clone(),
        reason: StopReason::Replace,
    };

    match current.status {
        ContainerStatus::Stopped => actions.push(start),
        ContainerStatus::Unhealthy => {
            log::debug!("{} is unhealthy, replacing", spec.name);
            actions.push(replace);
            actions.push(start);
        }
        ContainerStatus::Running => {
            let wanted = spec.fingerprint();
            if current.fingerprint.as_deref() == Some(wanted.as_str()) {
                return;
            }
            log::debug!(
                "{} changed ({} -> {}), replacing",
                spec.name,
                current.fingerprint.as_deref().unwrap_or("none"),
                wanted
            );
            actions.push(replace);
            actions.push(start);
        }
    }

    actions.push(ReconcileAction::WaitHealthy {
        service: spec.name.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PathStat;
    use crate::plan::{CertificateSettings, ProxySettings};
    use crate::spec::fixtures::{service, volume};
    use crate::spec::PublicEndpoint;
    use crate::state::ObservedService;
    use chrono::Utc;
    use std::path::PathBuf;

    fn proxy() -> ProxySettings {
        ProxySettings {
            config_path: "/etc/nginx/conf.d/keel.conf".into(),
            validate_command: vec!["nginx".into(), "-t".into()],
            reload_command: Some(vec!["nginx".into(), "-s".into(), "reload".into()]),
            reload_url: None,
            acme_webroot: None,
        }
    }

    fn sonar_plan() -> Plan {
        let mut db = service("db", &[]);
        db.volumes.push(volume("/srv/postgresql", 999));
        let mut app = service("app", &["db"]);
        app.public = Some(PublicEndpoint {
            hostname: "sonar.example.com".into(),
            port: 9000,
            tls: true,
        });
        let mut plan = Plan::from_services("sonar", vec![db, app]).unwrap();
        plan.proxy = Some(proxy());
        plan
    }

    fn running(spec: &ServiceSpec) -> ObservedService {
        ObservedService {
            status: ContainerStatus::Running,
            container_id: Some(format!("{}-id", spec.name)),
            started_at: Some(Utc::now()),
            fingerprint: Some(spec.fingerprint()),
        }
    }

    fn names(actions: &[ReconcileAction]) -> Vec<String> {
        actions.iter().map(ToString::to_string).collect()
    }

    fn converged(plan: &Plan) -> RuntimeState {
        let mut state = RuntimeState::empty(Utc::now());
        for spec in &plan.services {
            state.services.insert(spec.name.clone(), running(spec));
            for v in &spec.volumes {
                state.volumes.insert(
                    v.host_path.clone(),
                    Some(PathStat {
                        uid: v.uid,
                        gid: v.gid,
                        mode: v.permissions,
                    }),
                );
            }
        }
        state.proxy_in_sync = Some(true);
        state
    }

    #[test]
    fn test_fresh_host() {
        let plan = sonar_plan();
        let actions = reconcile(&plan, &RuntimeState::empty(Utc::now()));
        assert_eq!(
            names(&actions),
            vec![
                "CreateVolume(db)",
                "FixOwnership(db)",
                "StartService(db)",
                "WaitHealthy(db)",
                "StartService(app)",
                "WaitHealthy(app)",
                "ReloadProxy",
            ]
        );
    }

    #[test]
    fn test_db_running_app_stopped() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        state.services.insert("app".into(), ObservedService::stopped());
        state.proxy_in_sync = None;

        let actions = reconcile(&plan, &state);
        assert_eq!(
            names(&actions),
            vec!["StartService(app)", "WaitHealthy(app)", "ReloadProxy"]
        );
    }

    #[test]
    fn test_converged_state_is_empty() {
        let plan = sonar_plan();
        assert!(reconcile(&plan, &converged(&plan)).is_empty());
    }

    #[test]
    fn test_dependency_start_order() {
        let plan = Plan::from_services(
            "t",
            vec![service("b", &["a"]), service("c", &[]), service("a", &[])],
        )
        .unwrap();
        let actions = names(&reconcile(&plan, &RuntimeState::empty(Utc::now())));
        let pos = |s: &str| actions.iter().position(|a| a == s).unwrap();
        assert!(pos("StartService(a)") < pos("StartService(b)"));
        assert!(pos("StartService(c)") < pos("StartService(b)"));
    }

    #[test]
    fn test_wrong_owner_only_fixes_ownership() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        state.volumes.insert(
            PathBuf::from("/srv/postgresql"),
            Some(PathStat {
                uid: 0,
                gid: 0,
                mode: 0o750,
            }),
        );
        assert_eq!(names(&reconcile(&plan, &state)), vec!["FixOwnership(db)", "ReloadProxy"]);
    }

    #[test]
    fn test_changed_spec_is_replaced() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        if let Some(db) = state.services.get_mut("db") {
            db.fingerprint = Some("0000000000000000".into());
        }
        let actions = reconcile(&plan, &state);
        assert_eq!(
            actions[0],
            ReconcileAction::StopService {
                service: "db".into(),
                reason: StopReason::Replace
            }
        );
        assert_eq!(
            names(&actions),
            vec![
                "StopService(db)",
                "StartService(db)",
                "WaitHealthy(db)",
                "ReloadProxy"
            ]
        );
    }

    #[test]
    fn test_unhealthy_container_is_replaced() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        if let Some(app) = state.services.get_mut("app") {
            app.status = ContainerStatus::Unhealthy;
        }
        assert_eq!(
            names(&reconcile(&plan, &state)),
            vec!["StopService(app)", "StartService(app)", "WaitHealthy(app)", "ReloadProxy"]
        );
    }

    #[test]
    fn test_orphans_stopped_first() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        state.orphans.push("legacy".into());
        let actions = reconcile(&plan, &state);
        assert!(actions[0].is_orphan_stop());
        assert_eq!(names(&actions), vec!["StopService(legacy)", "ReloadProxy"]);
    }

    #[test]
    fn test_proxy_drift_alone_reloads() {
        let plan = sonar_plan();
        let mut state = converged(&plan);
        state.proxy_in_sync = Some(false);
        assert_eq!(names(&reconcile(&plan, &state)), vec!["ReloadProxy"]);
    }

    #[test]
    fn test_certificate_renewal_threshold() {
        let mut plan = sonar_plan();
        plan.certificates = Some(CertificateSettings {
            email: "ops@example.com".into(),
            webroot: "/var/www/acme".into(),
            renew_before: "30d".into(),
            max_attempts: 5,
            backoff_base: "30s".into(),
            backoff_max: "10m".into(),
            agent: "certbot".into(),
            live_dir: "/etc/letsencrypt/live".into(),
            alert_webhook: None,
        });

        let mut state = converged(&plan);
        let now = state.observed_at;
        state
            .certificates
            .insert("sonar.example.com".into(), Some(now + ChronoDuration::days(60)));
        assert!(reconcile(&plan, &state).is_empty());

        state
            .certificates
            .insert("sonar.example.com".into(), Some(now + ChronoDuration::days(10)));
        assert_eq!(
            names(&reconcile(&plan, &state)),
            vec!["IssueOrRenewCertificate(sonar.example.com)"]
        );

        state.certificates.insert("sonar.example.com".into(), None);
        state.services.insert("app".into(), ObservedService::stopped());
        let actions = names(&reconcile(&plan, &state));
        assert_eq!(
            &actions[actions.len() - 2..],
            ["ReloadProxy", "IssueOrRenewCertificate(sonar.example.com)"]
        );
    }
}
