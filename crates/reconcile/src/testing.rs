//! In-memory fakes for the capability traits

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::capability::{
    Alert, AlertSink, CertificateControl, ContainerInfo, ContainerRuntime, ContainerStatus,
    Filesystem, PathStat, Prober, ProxyControl,
};
use crate::error::{Error, Result};
use crate::spec::{OwnershipPolicy, Probe, Route, ServiceSpec};

#[derive(Default)]
struct RuntimeInner {
    containers: BTreeMap<String, ContainerInfo>,
    retired: BTreeMap<String, ContainerInfo>,
    failing: HashSet<String>,
    unreachable: bool,
    calls: Vec<String>,
    next_id: u32,
}

/// Container runtime kept in memory
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<RuntimeInner>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_running(&self, service: &str, fingerprint: &str) {
        self.seed(service, fingerprint, ContainerStatus::Running);
    }

    pub fn seed(&self, service: &str, fingerprint: &str, status: ContainerStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("seed{}", inner.next_id);
        inner.containers.insert(
            service.to_string(),
            ContainerInfo {
                id,
                status,
                started_at: Some(Utc::now()),
                fingerprint: Some(fingerprint.to_string()),
            },
        );
    }

    pub fn set_unreachable(&self) {
        self.inner.lock().unwrap().unreachable = true;
    }

    pub fn fail_start(&self, service: &str) {
        self.inner.lock().unwrap().failing.insert(service.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn container(&self, service: &str) -> Option<ContainerInfo> {
        self.inner.lock().unwrap().containers.get(service).cloned()
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> Result<()> {
        if self.inner.lock().unwrap().unreachable {
            return Err(Error::Unreachable {
                component: "container runtime".into(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }

    fn inspect(&self, service: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.container(service))
    }

    fn list_stack(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().unwrap().containers.keys().cloned().collect())
    }

    fn start(&self, spec: &ServiceSpec, fingerprint: &str) -> Result<String> {
        self.record(format!("start {}", spec.name));
        let mut inner = self.inner.lock().unwrap();
        if inner.failing.contains(&spec.name) {
            return Err(Error::runtime(&spec.name, "image pull failed"));
        }
        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        inner.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                status: ContainerStatus::Running,
                started_at: Some(Utc::now()),
                fingerprint: Some(fingerprint.to_string()),
            },
        );
        Ok(id)
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.record(format!("stop {}", service));
        self.inner.lock().unwrap().containers.remove(service);
        Ok(())
    }

    fn retire(&self, service: &str) -> Result<()> {
        self.record(format!("retire {}", service));
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut info) = inner.containers.remove(service) {
            info.status = ContainerStatus::Stopped;
            inner.retired.insert(service.to_string(), info);
        }
        Ok(())
    }

    fn restore(&self, service: &str) -> Result<()> {
        self.record(format!("restore {}", service));
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut info) = inner.retired.remove(service) {
            info.status = ContainerStatus::Running;
            inner.containers.insert(service.to_string(), info);
        }
        Ok(())
    }

    fn discard(&self, service: &str) -> Result<()> {
        self.record(format!("discard {}", service));
        self.inner.lock().unwrap().retired.remove(service);
        Ok(())
    }

    fn exec(&self, service: &str, _command: &[String], _timeout: Duration) -> Result<bool> {
        Ok(self
            .container(service)
            .is_some_and(|c| c.status == ContainerStatus::Running))
    }
}

/// Filesystem kept in memory
#[derive(Default)]
pub struct FakeFs {
    paths: Mutex<BTreeMap<PathBuf, PathStat>>,
    transient_failures: Mutex<HashMap<PathBuf, u32>>,
    pub chown_calls: AtomicU32,
}

impl FakeFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: &str, uid: u32, gid: u32, mode: u32) {
        self.paths
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), PathStat { uid, gid, mode });
    }

    /// Make the next `times` chown calls on `path` fail with a busy error
    pub fn fail_transiently(&self, path: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), times);
    }
}

impl Filesystem for FakeFs {
    fn stat(&self, path: &Path) -> Result<Option<PathStat>> {
        Ok(self.paths.lock().unwrap().get(path).copied())
    }

    fn create_dir_all(&self, path: &Path, mode: u32) -> Result<()> {
        self.paths
            .lock()
            .unwrap()
            .entry(path.to_path_buf())
            .or_insert(PathStat { uid: 0, gid: 0, mode });
        Ok(())
    }

    fn set_owner(&self, path: &Path, uid: u32, gid: u32, _policy: OwnershipPolicy) -> Result<()> {
        self.chown_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(left) = self.transient_failures.lock().unwrap().get_mut(path)
            && *left > 0
        {
            *left -= 1;
            return Err(Error::Filesystem {
                path: path.to_path_buf(),
                message: "resource busy".into(),
                retryable: true,
            });
        }
        let mut paths = self.paths.lock().unwrap();
        let stat = paths.get_mut(path).ok_or_else(|| Error::Filesystem {
            path: path.to_path_buf(),
            message: "no such directory".into(),
            retryable: false,
        })?;
        stat.uid = uid;
        stat.gid = gid;
        Ok(())
    }

    fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        if let Some(stat) = self.paths.lock().unwrap().get_mut(path) {
            stat.mode = mode;
        }
        Ok(())
    }
}

/// Prober answering from a per-service table, healthy by default
pub struct FakeProber {
    default: bool,
    answers: Mutex<HashMap<String, bool>>,
}

impl FakeProber {
    pub fn healthy() -> Self {
        Self {
            default: true,
            answers: Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, service: &str, healthy: bool) {
        self.answers
            .lock()
            .unwrap()
            .insert(service.to_string(), healthy);
    }
}

impl Prober for FakeProber {
    fn probe(&self, service: &str, _probe: &Probe, _timeout: Duration) -> bool {
        self.answers
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Proxy that remembers activations
#[derive(Default)]
pub struct FakeProxy {
    active: Mutex<Option<Vec<Route>>>,
    pub activations: Mutex<Vec<Vec<Route>>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl ProxyControl for FakeProxy {
    fn in_sync(&self, routes: &[Route]) -> Result<bool> {
        Ok(self.active.lock().unwrap().as_deref() == Some(routes))
    }

    fn activate(&self, routes: &[Route]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Unreachable {
                component: "proxy".into(),
                message: "validation failed".into(),
            });
        }
        *self.active.lock().unwrap() = Some(routes.to_vec());
        self.activations.lock().unwrap().push(routes.to_vec());
        Ok(())
    }
}

/// Certificate agent with a programmable number of failures
#[derive(Default)]
pub struct FakeCerts {
    expiry: Mutex<HashMap<String, DateTime<Utc>>>,
    failures_left: AtomicU32,
    pub attempts: AtomicU32,
}

impl FakeCerts {
    pub fn seed(&self, domain: &str, expires: DateTime<Utc>) {
        self.expiry
            .lock()
            .unwrap()
            .insert(domain.to_string(), expires);
    }

    pub fn fail_next(&self, times: u32) {
        self.failures_left.store(times, Ordering::SeqCst);
    }
}

impl CertificateControl for FakeCerts {
    fn expiry(&self, domain: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.expiry.lock().unwrap().get(domain).copied())
    }

    fn issue_or_renew(&self, domain: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(Error::certificate(domain, "too many requests"));
        }
        self.seed(domain, Utc::now() + ChronoDuration::days(90));
        Ok(())
    }
}

/// Collects alerts
#[derive(Default)]
pub struct FakeAlerts {
    pub raised: Mutex<Vec<Alert>>,
}

impl AlertSink for FakeAlerts {
    fn alert(&self, alert: &Alert) -> Result<()> {
        self.raised.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
