//! Upstream router
//!
//! One redirect block: decides whether a name belongs to the block and which
//! host should answer it.
//!
//! ```text
//! name ──> DomainMatcher ──yes──> ExclusionSet ──no──> LoadBalancer::select
//!                                                          │
//!                          exchange(host) <────────────────┘
//!                               │ Err and spray
//!                               v
//!                  next host in configuration order, each once
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dns_redirect::{Domain, UpstreamRouter};
//! use dns_redirect::upstream::Policy;
//!
//! # async fn run() -> dns_redirect::RedirectResult<()> {
//! let router = UpstreamRouter::builder("cn")
//!     .source("/etc/dns-redirect/china.conf")
//!     .except(["example.cn"])
//!     .upstream("114.114.114.114")
//!     .upstream("tls://223.5.5.5")
//!     .policy(Policy::RoundRobin)
//!     .spray(true)
//!     .build()?;
//!
//! router.start().await;
//! if router.matches("www.baidu.com") {
//!     let answer = router
//!         .dispatch(|host| async move { Ok(host.socket_addr()) })
//!         .await?;
//!     println!("answered by {answer}");
//! }
//! router.stop().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::RedirectConfig;
use crate::domain::Domain;
use crate::error::{RedirectError, RedirectResult};
use crate::namelist::{DomainMatcher, ExclusionSet, ListSource, DEFAULT_RELOAD_INTERVAL};
use crate::task::PeriodicTask;
use crate::upstream::{
    expand_upstreams, DnsProbe, HealthCheckSettings, HealthMonitor, LoadBalancer, Policy, Probe,
    TransportOptions, TransportOverrides, UpstreamHost, DEFAULT_MAX_FAILS,
};

/// Router statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Names accepted by the block
    pub matched: u64,
    /// Names matched by the lists but excluded
    pub excluded: u64,
    /// Dispatch calls
    pub dispatches: u64,
    /// Individual host attempts that failed
    pub failed_attempts: u64,
    /// Dispatches that ended without a successful host
    pub failed_dispatches: u64,
}

#[derive(Debug, Default)]
struct RouterCounters {
    matched: AtomicU64,
    excluded: AtomicU64,
    dispatches: AtomicU64,
    failed_attempts: AtomicU64,
    failed_dispatches: AtomicU64,
}

/// Where a router is in its start/stop cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    /// Initial list load in progress
    Starting,
    Running,
}

#[derive(Debug)]
struct Lifecycle {
    phase: Phase,
    /// Bumped by every `stop`; a `start` that began in an older generation
    /// must not spawn anything
    generation: u64,
}

/// One redirect block
#[derive(Debug)]
pub struct UpstreamRouter {
    name: String,
    matcher: Arc<DomainMatcher>,
    exclusions: ExclusionSet,
    hosts: Vec<Arc<UpstreamHost>>,
    balancer: LoadBalancer,
    monitor: HealthMonitor,
    reload_interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    reloader: Mutex<Option<PeriodicTask>>,
    counters: RouterCounters,
}

impl UpstreamRouter {
    /// Start building a router
    pub fn builder(name: impl Into<String>) -> RouterBuilder {
        RouterBuilder::new(name)
    }

    /// Build a router from a validated configuration block
    ///
    /// `transport` holds the global defaults; the block's own transport
    /// table is applied on top.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for bad addresses, policies or TLS
    /// parameters.
    pub fn from_config(
        name: impl Into<String>,
        config: &RedirectConfig,
        transport: &TransportOptions,
        probe: Arc<dyn Probe>,
    ) -> RedirectResult<Self> {
        let policy = config.policy.parse::<Policy>()?;

        RouterBuilder::new(name)
            .sources(config.sources.iter().cloned())
            .reload_interval(config.reload_interval())
            .except(config.except.iter().cloned())
            .policy(policy)
            .spray(config.spray)
            .health_check(
                HealthCheckSettings::default()
                    .with_interval(config.health_check.interval())
                    .with_timeout(config.health_check.timeout()),
            )
            .max_fails(config.health_check.max_fails)
            .upstreams(config.to.iter().cloned())
            .transport(transport.clone())
            .transport_overrides(config.transport.to_overrides())
            .probe(probe)
            .build()
    }

    /// Block name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured hosts, in configuration order
    pub fn hosts(&self) -> &[Arc<UpstreamHost>] {
        &self.hosts
    }

    /// The domain matcher
    pub fn matcher(&self) -> &Arc<DomainMatcher> {
        &self.matcher
    }

    /// The exclusion set
    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// The load balancer
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// The health monitor
    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    /// Returns true if `name` should be handled by this block
    ///
    /// Names that are not valid domain names never match.
    pub fn matches(&self, name: &str) -> bool {
        match Domain::parse(name) {
            Some(domain) => self.matches_domain(&domain),
            None => {
                warn!(redirect = %self.name, name, "Not a valid domain name");
                false
            }
        }
    }

    /// Returns true if `domain` is listed and not excluded
    pub fn matches_domain(&self, domain: &Domain) -> bool {
        if !self.matcher.matches(domain) {
            return false;
        }
        if self.exclusions.matches(domain) {
            self.counters.excluded.fetch_add(1, Ordering::Relaxed);
            debug!(redirect = %self.name, name = %domain, "Skipping excluded name");
            return false;
        }
        self.counters.matched.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Pick the host for a query according to the policy
    pub fn select(&self) -> Option<Arc<UpstreamHost>> {
        self.balancer.select(&self.hosts).cloned()
    }

    /// Run `exchange` against the selected host, retrying under spray
    ///
    /// Each attempt is bounded by the host's transport timeout. Without
    /// spray the first failure is returned as is. With spray every other host
    /// is tried once in configuration order, and
    /// `RedirectError::Exhausted` is returned if all of them fail.
    ///
    /// # Errors
    ///
    /// Returns the failure of the last attempted host as described above, or
    /// `RedirectError::NoUpstream` if the block has no hosts.
    pub async fn dispatch<T, F, Fut>(&self, mut exchange: F) -> RedirectResult<T>
    where
        F: FnMut(Arc<UpstreamHost>) -> Fut,
        Fut: Future<Output = RedirectResult<T>>,
    {
        self.counters.dispatches.fetch_add(1, Ordering::Relaxed);

        let Some(first) = self.balancer.select_index(&self.hosts) else {
            self.counters.failed_dispatches.fetch_add(1, Ordering::Relaxed);
            return Err(RedirectError::no_upstream(format!(
                "redirect '{}' has no hosts",
                self.name
            )));
        };

        let mut attempts = 0usize;
        let mut last_error = None;

        for index in self.balancer.attempt_order(first, self.hosts.len()) {
            let host = Arc::clone(&self.hosts[index]);
            let timeout = host.transport().timeout();
            attempts += 1;

            let result = match tokio::time::timeout(timeout, exchange(Arc::clone(&host))).await {
                Ok(result) => result,
                Err(_) => Err(RedirectError::timeout(format!("exchange with {host}"), timeout)),
            };

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(
                            redirect = %self.name,
                            host = %host,
                            attempts,
                            "Spray succeeded on a later host"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    self.counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        redirect = %self.name,
                        host = %host,
                        error = %e,
                        attempt = attempts,
                        "Upstream exchange failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        self.counters.failed_dispatches.fetch_add(1, Ordering::Relaxed);
        let last_error = last_error
            .unwrap_or_else(|| RedirectError::no_upstream("no host was attempted"));

        if self.balancer.spray() {
            warn!(
                redirect = %self.name,
                attempts,
                error = %last_error,
                "All upstreams failed"
            );
            Err(RedirectError::Exhausted {
                attempts,
                last_error: last_error.to_string(),
            })
        } else {
            Err(last_error)
        }
    }

    /// Load the domain lists, then start the reload and probe loops
    ///
    /// The first load happens before this returns. If it fails the router
    /// starts with an empty index and the periodic reload keeps retrying.
    /// Calling `start` on a running or starting router does nothing. If
    /// `stop` is called while the first load is in progress, no background
    /// task is started.
    pub async fn start(&self) {
        let generation = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.phase != Phase::Stopped {
                debug!(redirect = %self.name, "Router already started");
                return;
            }
            lifecycle.phase = Phase::Starting;
            lifecycle.generation
        };

        if let Err(e) = self.matcher.reload().await {
            warn!(redirect = %self.name, error = %e, "Initial domain list load failed");
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.phase != Phase::Starting || lifecycle.generation != generation {
                info!(redirect = %self.name, "Router stopped during startup");
                return;
            }

            if self.reload_interval.is_zero() {
                info!(redirect = %self.name, "Periodic domain list reload disabled");
            } else {
                let task = self.matcher.spawn_reloader(&self.name, self.reload_interval);
                *self.reloader.lock() = Some(task);
            }
            self.monitor.start();
            lifecycle.phase = Phase::Running;
        }

        info!(
            redirect = %self.name,
            patterns = self.matcher.stats().patterns,
            hosts = self.hosts.len(),
            policy = %self.balancer.policy(),
            spray = self.balancer.spray(),
            "Redirect started"
        );
    }

    /// Stop the reload and probe loops
    ///
    /// Safe to call more than once, before `start`, and while `start` is
    /// still loading the lists. No background task of this router runs once
    /// it returns.
    pub async fn stop(&self) {
        let (reloader, probes) = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.phase = Phase::Stopped;
            lifecycle.generation += 1;
            (self.reloader.lock().take(), self.monitor.detach())
        };

        if let Some(task) = reloader {
            task.stop().await;
        }
        HealthMonitor::stop_tasks(&self.name, probes).await;
        debug!(redirect = %self.name, "Redirect stopped");
    }

    /// Returns true once `start` has spawned the background loops and until
    /// `stop` is called
    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().phase == Phase::Running
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            matched: self.counters.matched.load(Ordering::Relaxed),
            excluded: self.counters.excluded.load(Ordering::Relaxed),
            dispatches: self.counters.dispatches.load(Ordering::Relaxed),
            failed_attempts: self.counters.failed_attempts.load(Ordering::Relaxed),
            failed_dispatches: self.counters.failed_dispatches.load(Ordering::Relaxed),
        }
    }
}

/// Builder for [`UpstreamRouter`]
#[derive(Debug)]
pub struct RouterBuilder {
    name: String,
    sources: Vec<PathBuf>,
    patterns: Vec<Domain>,
    reload_interval: Duration,
    except: Vec<String>,
    policy: Policy,
    spray: bool,
    health_check: HealthCheckSettings,
    max_fails: u32,
    upstreams: Vec<String>,
    transport: TransportOptions,
    overrides: TransportOverrides,
    probe: Option<Arc<dyn Probe>>,
}

impl RouterBuilder {
    /// Create a builder with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: Vec::new(),
            patterns: Vec::new(),
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            except: Vec::new(),
            policy: Policy::default(),
            spray: false,
            health_check: HealthCheckSettings::default(),
            max_fails: DEFAULT_MAX_FAILS,
            upstreams: Vec::new(),
            transport: TransportOptions::default(),
            overrides: TransportOverrides::default(),
            probe: None,
        }
    }

    /// Add a domain-list file
    #[must_use]
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    /// Add several domain-list files
    #[must_use]
    pub fn sources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.sources.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Use a fixed pattern set instead of list files
    ///
    /// Ignored when any source is configured.
    #[must_use]
    pub fn patterns<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = Domain>,
    {
        self.patterns.extend(patterns);
        self
    }

    /// Set the reload check interval; zero disables periodic reload
    #[must_use]
    pub fn reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Add exclusion entries
    #[must_use]
    pub fn except<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Set the selection policy
    #[must_use]
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable spray
    #[must_use]
    pub fn spray(mut self, spray: bool) -> Self {
        self.spray = spray;
        self
    }

    /// Set probe interval and timeout
    #[must_use]
    pub fn health_check(mut self, settings: HealthCheckSettings) -> Self {
        self.health_check = settings;
        self
    }

    /// Set the failure threshold
    #[must_use]
    pub fn max_fails(mut self, max_fails: u32) -> Self {
        self.max_fails = max_fails;
        self
    }

    /// Add an upstream address or nameserver file
    #[must_use]
    pub fn upstream(mut self, address: impl Into<String>) -> Self {
        self.upstreams.push(address.into());
        self
    }

    /// Add several upstream addresses or nameserver files
    #[must_use]
    pub fn upstreams<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upstreams.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Set the inherited transport defaults
    #[must_use]
    pub fn transport(mut self, options: TransportOptions) -> Self {
        self.transport = options;
        self
    }

    /// Set the block's transport overrides
    #[must_use]
    pub fn transport_overrides(mut self, overrides: TransportOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Use a custom liveness probe instead of [`DnsProbe`]
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the router
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no upstream is given, an upstream
    /// cannot be parsed or set up, or a nameserver file is unreadable or
    /// empty.
    pub fn build(self) -> RedirectResult<UpstreamRouter> {
        if self.upstreams.is_empty() {
            return Err(RedirectError::config_field(
                "missing mandatory property, at least one upstream is required",
                "to",
            ));
        }

        let options = self.transport.with_overrides(&self.overrides);
        let hosts = expand_upstreams(&self.upstreams)?
            .into_iter()
            .map(|address| {
                UpstreamHost::from_address(address, &options, self.max_fails).map(Arc::new)
            })
            .collect::<RedirectResult<Vec<_>>>()?;

        for host in &hosts {
            debug!(
                redirect = %self.name,
                host = %host,
                protocol = %host.protocol(),
                "Configured upstream"
            );
        }

        let matcher = if self.sources.is_empty() {
            DomainMatcher::from_patterns(self.patterns)
        } else {
            DomainMatcher::new(self.sources.into_iter().map(ListSource::new).collect())
        };

        let probe = self.probe.unwrap_or_else(|| Arc::new(DnsProbe::new()));
        let monitor = HealthMonitor::new(self.name.clone(), hosts.clone(), probe, self.health_check);

        Ok(UpstreamRouter {
            name: self.name,
            matcher: Arc::new(matcher),
            exclusions: ExclusionSet::new(self.except),
            hosts,
            balancer: LoadBalancer::new(self.policy, self.spray),
            monitor,
            reload_interval: self.reload_interval,
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Stopped,
                generation: 0,
            }),
            reloader: Mutex::new(None),
            counters: RouterCounters::default(),
        })
    }
}
