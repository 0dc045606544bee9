//! Health monitor - per-service health state machines fed by probe threads
//!
//! ```text
//! Stopped --restart--> Starting --probe ok--> Healthy --retries failures--> Unhealthy
//!                         |                                                    |
//!                         +--start_period elapsed--> Failed      restart: back to Starting
//! ```
//!
//! Every service with a health check gets its own probe thread. Results are
//! sent over a channel to one writer thread, the only code that mutates the
//! state machines. Readers (the executor, `status`) see published snapshots.
//! A restart wakes the service's probe thread so the first probe of a new
//! Starting cycle does not wait out the previous interval.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::capability::Prober;
use crate::error::{Error, Result};
use crate::spec::{HealthCheck, ServiceSpec};

const WRITER_TICK: Duration = Duration::from_millis(25);
const WAIT_POLL: Duration = Duration::from_millis(20);

/// Health of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Not running; probe results are ignored
    Stopped,
    Starting,
    Healthy,
    Unhealthy,
    /// Never became healthy within the start period
    Failed,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Stopped => "stopped",
            HealthState::Starting => "starting",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// State machine for one service, driven with explicit timestamps
#[derive(Debug, Clone)]
pub struct HealthTracker {
    check: Option<HealthCheck>,
    state: HealthState,
    since: Instant,
    failures: u32,
}

impl HealthTracker {
    pub fn new(check: Option<HealthCheck>, now: Instant) -> Self {
        Self {
            check,
            state: HealthState::Stopped,
            since: now,
            failures: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Begin a new start cycle
    pub fn restart(&mut self, now: Instant) {
        self.state = if self.check.is_some() {
            HealthState::Starting
        } else {
            HealthState::Healthy
        };
        self.since = now;
        self.failures = 0;
    }

    pub fn stop(&mut self, now: Instant) {
        self.state = HealthState::Stopped;
        self.since = now;
        self.failures = 0;
    }

    /// Feed a probe result
    pub fn record(&mut self, success: bool, now: Instant) {
        let Some(check) = &self.check else {
            return;
        };
        match self.state {
            HealthState::Starting if success => {
                self.state = HealthState::Healthy;
                self.since = now;
                self.failures = 0;
            }
            HealthState::Starting => self.tick(now),
            HealthState::Healthy if success => self.failures = 0,
            HealthState::Healthy => {
                self.failures += 1;
                if self.failures >= check.retries {
                    self.state = HealthState::Unhealthy;
                    self.since = now;
                }
            }
            HealthState::Stopped | HealthState::Unhealthy | HealthState::Failed => {}
        }
    }

    /// Advance time: a service starting for longer than its start period fails
    pub fn tick(&mut self, now: Instant) {
        if let Some(check) = &self.check
            && self.state == HealthState::Starting
            && now.duration_since(self.since) >= check.start_period
        {
            self.state = HealthState::Failed;
            self.since = now;
        }
    }
}

enum Message {
    Probe { service: String, success: bool },
    Restart { service: String, ack: Sender<()> },
    Stop { service: String, ack: Sender<()> },
    Shutdown,
}

type Snapshot = Arc<RwLock<BTreeMap<String, HealthState>>>;

/// Live health monitor for a set of services
pub struct HealthMonitor {
    tx: Sender<Message>,
    snapshot: Snapshot,
    /// Per probe thread; dropping a sender ends its thread
    wakers: BTreeMap<String, Sender<()>>,
    shutdown: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Start monitoring; every service begins in `Stopped`
    pub fn start(services: &[ServiceSpec], prober: Arc<dyn Prober>) -> Self {
        let now = Instant::now();
        let trackers: BTreeMap<String, HealthTracker> = services
            .iter()
            .map(|s| (s.name.clone(), HealthTracker::new(s.health.clone(), now)))
            .collect();
        let snapshot: Snapshot = Arc::new(RwLock::new(
            trackers.iter().map(|(k, t)| (k.clone(), t.state())).collect(),
        ));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Message>();

        let writer = {
            let snapshot = Arc::clone(&snapshot);
            thread::spawn(move || run_writer(trackers, &rx, &snapshot))
        };

        let mut wakers = BTreeMap::new();
        for spec in services {
            let Some(check) = spec.health.clone() else {
                continue;
            };
            let (wake, woken) = mpsc::channel();
            wakers.insert(spec.name.clone(), wake);

            let name = spec.name.clone();
            let tx = tx.clone();
            let prober = Arc::clone(&prober);
            let snapshot = Arc::clone(&snapshot);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                run_prober(&name, &check, prober.as_ref(), &snapshot, &shutdown, &tx, &woken);
            });
        }

        Self {
            tx,
            snapshot,
            wakers,
            shutdown,
            writer: Some(writer),
        }
    }

    /// Copy of the current states
    pub fn snapshot(&self) -> BTreeMap<String, HealthState> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Current state of one service
    pub fn state(&self, service: &str) -> Option<HealthState> {
        self.snapshot.read().ok().and_then(|s| s.get(service).copied())
    }

    /// True when every service that is not stopped is healthy
    pub fn ready(&self) -> bool {
        self.snapshot()
            .values()
            .all(|s| matches!(s, HealthState::Stopped | HealthState::Healthy))
    }

    /// Enter a new Starting cycle; returns once the writer applied it
    pub fn restart(&self, service: &str) {
        let (ack, done) = mpsc::channel();
        if self
            .tx
            .send(Message::Restart {
                service: service.to_string(),
                ack,
            })
            .is_ok()
        {
            let _ = done.recv();
        }
        if let Some(wake) = self.wakers.get(service) {
            let _ = wake.send(());
        }
    }

    /// Mark a service stopped; returns once the writer applied it
    pub fn stop(&self, service: &str) {
        let (ack, done) = mpsc::channel();
        if self
            .tx
            .send(Message::Stop {
                service: service.to_string(),
                ack,
            })
            .is_ok()
        {
            let _ = done.recv();
        }
    }

    /// Poll until the service is Healthy
    ///
    /// Fails with `HealthTimeout` after `timeout`, or as soon as the service
    /// reaches `Failed`.
    pub fn wait_healthy(&self, service: &str, timeout: Duration, cancel: &CancelToken) -> Result<()> {
        let started = Instant::now();
        loop {
            let state = self.state(service).unwrap_or(HealthState::Stopped);
            match state {
                HealthState::Healthy => return Ok(()),
                HealthState::Failed => {
                    return Err(Error::HealthTimeout {
                        service: service.to_string(),
                        waited: started.elapsed(),
                        state,
                    });
                }
                _ => {}
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if started.elapsed() >= timeout {
                return Err(Error::HealthTimeout {
                    service: service.to_string(),
                    waited: started.elapsed(),
                    state,
                });
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Wait until no service is Starting, or the timeout passes
    pub fn wait_settled(&self, timeout: Duration) {
        let started = Instant::now();
        while started.elapsed() < timeout
            && self.snapshot().values().any(|s| *s == HealthState::Starting)
        {
            thread::sleep(WAIT_POLL);
        }
    }

    /// Stop the probe threads and the writer
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wakers.clear();
        let _ = self.tx.send(Message::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer(
    mut trackers: BTreeMap<String, HealthTracker>,
    rx: &mpsc::Receiver<Message>,
    snapshot: &Snapshot,
) {
    loop {
        let message = rx.recv_timeout(WRITER_TICK);
        let now = Instant::now();
        let mut ack = None;

        match message {
            Ok(Message::Probe { service, success }) => {
                if let Some(t) = trackers.get_mut(&service) {
                    t.record(success, now);
                }
            }
            Ok(Message::Restart { service, ack: a }) => {
                if let Some(t) = trackers.get_mut(&service) {
                    t.restart(now);
                }
                ack = Some(a);
            }
            Ok(Message::Stop { service, ack: a }) => {
                if let Some(t) = trackers.get_mut(&service) {
                    t.stop(now);
                }
                ack = Some(a);
            }
            Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        for tracker in trackers.values_mut() {
            tracker.tick(now);
        }
        publish(&trackers, snapshot);

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

fn publish(trackers: &BTreeMap<String, HealthTracker>, snapshot: &Snapshot) {
    let Ok(mut published) = snapshot.write() else {
        return;
    };
    for (name, tracker) in trackers {
        let state = tracker.state();
        let previous = published.insert(name.clone(), state);
        if previous != Some(state) {
            match state {
                HealthState::Unhealthy | HealthState::Failed => {
                    log::warn!("{}: {} -> {}", name, previous.unwrap_or(state), state);
                }
                _ => log::info!("{}: {} -> {}", name, previous.unwrap_or(state), state),
            }
        }
    }
}

fn run_prober(
    service: &str,
    check: &HealthCheck,
    prober: &dyn Prober,
    snapshot: &Snapshot,
    shutdown: &AtomicBool,
    tx: &Sender<Message>,
    woken: &mpsc::Receiver<()>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let active = snapshot
            .read()
            .ok()
            .and_then(|s| s.get(service).copied())
            .is_some_and(|state| matches!(state, HealthState::Starting | HealthState::Healthy));

        if active {
            let success = prober.probe(service, &check.probe, check.timeout);
            log::trace!("probe {} ({}): {}", service, check.probe, success);
            let message = Message::Probe {
                service: service.to_string(),
                success,
            };
            if tx.send(message).is_err() {
                return;
            }
        }
        match woken.recv_timeout(check.interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
