//! Background health monitor
//!
//! One [`PeriodicTask`] per host. Each task probes only its own host, so a
//! host whose probe hangs until the timeout delays nobody else, and each
//! host's [`HostHealth`](super::HostHealth) has exactly one writer.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::health::Transition;
use super::host::UpstreamHost;
use super::probe::Probe;
use crate::error::RedirectError;
use crate::task::PeriodicTask;

/// Default interval between probes of one host
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(2000);

/// Default probe timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_millis(1500);

/// Probe scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckSettings {
    /// Time between probes; zero disables probing
    pub interval: Duration,
    /// Deadline for a single probe
    pub timeout: Duration,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHECK_INTERVAL,
            timeout: DEFAULT_CHECK_TIMEOUT,
        }
    }
}

impl HealthCheckSettings {
    /// Set the probe interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the probe timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Periodically probes every host of one redirect block
#[derive(Debug)]
pub struct HealthMonitor {
    name: String,
    hosts: Vec<Arc<UpstreamHost>>,
    probe: Arc<dyn Probe>,
    settings: HealthCheckSettings,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl HealthMonitor {
    /// Create a stopped monitor
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<Arc<UpstreamHost>>,
        probe: Arc<dyn Probe>,
        settings: HealthCheckSettings,
    ) -> Self {
        Self {
            name: name.into(),
            hosts,
            probe,
            settings,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Probe scheduling parameters
    pub fn settings(&self) -> HealthCheckSettings {
        self.settings
    }

    /// Returns true while probe tasks are running
    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }

    /// Spawn one probe task per host
    ///
    /// Does nothing if already running or if the interval is zero.
    pub fn start(&self) {
        if self.settings.interval.is_zero() {
            info!(redirect = %self.name, "Health checking disabled");
            return;
        }

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            debug!(redirect = %self.name, "Health monitor already running");
            return;
        }

        for host in &self.hosts {
            let host = Arc::clone(host);
            let probe = Arc::clone(&self.probe);
            let timeout = self.settings.timeout;
            let task_name = format!("{}/health/{}", self.name, host);

            tasks.push(PeriodicTask::spawn(task_name, self.settings.interval, move || {
                let host = Arc::clone(&host);
                let probe = Arc::clone(&probe);
                async move {
                    check_host(probe.as_ref(), &host, timeout).await;
                }
            }));
        }

        info!(
            redirect = %self.name,
            hosts = self.hosts.len(),
            interval_ms = self.settings.interval.as_millis() as u64,
            timeout_ms = self.settings.timeout.as_millis() as u64,
            "Health monitor started"
        );
    }

    /// Stop every probe task and wait for them to exit
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        Self::stop_tasks(&self.name, self.detach()).await;
    }

    /// Take ownership of the running probe tasks, leaving the monitor stopped
    ///
    /// The returned tasks run until passed to [`HealthMonitor::stop_tasks`];
    /// dropping them aborts them.
    pub(crate) fn detach(&self) -> Vec<PeriodicTask> {
        std::mem::take(&mut *self.tasks.lock())
    }

    /// Stop tasks previously taken with [`HealthMonitor::detach`]
    pub(crate) async fn stop_tasks(name: &str, tasks: Vec<PeriodicTask>) {
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.stop().await;
        }
        info!(redirect = %name, "Health monitor stopped");
    }
}

/// Run one probe against `host` and record the result
///
/// A probe that does not finish within `timeout` counts as a failure.
pub async fn check_host(probe: &dyn Probe, host: &UpstreamHost, timeout: Duration) -> Transition {
    let result = match tokio::time::timeout(timeout, probe.probe(host)).await {
        Ok(result) => result,
        Err(_) => Err(RedirectError::timeout(format!("health probe to {host}"), timeout)),
    };

    let health = host.health();
    match result {
        Ok(()) => {
            let transition = health.record_success();
            if transition == Transition::Recovered {
                info!(host = %host, "Upstream is back up");
            }
            transition
        }
        Err(e) => {
            let transition = health.record_failure();
            debug!(
                host = %host,
                error = %e,
                consecutive_failures = health.consecutive_failures(),
                "Health probe failed"
            );
            if transition == Transition::WentDown {
                warn!(
                    host = %host,
                    consecutive_failures = health.consecutive_failures(),
                    "Upstream marked down"
                );
            }
            transition
        }
    }
}
