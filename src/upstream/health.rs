//! Per-host health state
//!
//! Consecutive-failure counting with reset on success:
//!
//! ```text
//! Up ──[max_fails consecutive probe failures]──> Down ──[1 success]──> Up
//! ```
//!
//! The failure counter and the up/down flag are packed into one `AtomicU64`
//! so a reader always sees a pair written by the same update. Only the host's
//! probe task writes; the load balancer only reads.
//!
//! # Example
//!
//! ```
//! use dns_redirect::upstream::HostHealth;
//!
//! let health = HostHealth::new(3);
//! health.record_failure();
//! health.record_failure();
//! assert!(health.is_up());
//!
//! health.record_failure();
//! assert!(!health.is_up());
//!
//! health.record_success();
//! assert!(health.is_up());
//! assert_eq!(health.consecutive_failures(), 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

/// Default number of consecutive failures before a host is marked down
pub const DEFAULT_MAX_FAILS: u32 = 3;

const DOWN_BIT: u64 = 1 << 32;
const FAILS_MASK: u64 = u32::MAX as u64;

#[inline]
fn pack(fails: u32, down: bool) -> u64 {
    u64::from(fails) | if down { DOWN_BIT } else { 0 }
}

#[inline]
fn unpack(state: u64) -> (u32, bool) {
    ((state & FAILS_MASK) as u32, state & DOWN_BIT != 0)
}

/// State change caused by a probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Classification unchanged
    None,
    /// Host went from up to down
    WentDown,
    /// Host went from down to up
    Recovered,
}

/// Consistent view of one host's classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Whether the host is currently usable
    pub up: bool,
    /// Consecutive probe failures
    pub consecutive_failures: u32,
}

/// Probe statistics for one host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthStats {
    /// Whether the host is currently usable
    pub up: bool,
    /// Consecutive probe failures
    pub consecutive_failures: u32,
    /// Probes completed
    pub probes: u64,
    /// Probes that failed
    pub failed_probes: u64,
    /// Up to down transitions
    pub times_down: u64,
    /// Down to up transitions
    pub recoveries: u64,
}

impl HealthStats {
    /// Fraction of probes that succeeded, as a percentage
    ///
    /// Returns 100.0 before the first probe.
    pub fn success_rate(&self) -> f64 {
        if self.probes == 0 {
            100.0
        } else {
            ((self.probes - self.failed_probes) as f64 / self.probes as f64) * 100.0
        }
    }
}

/// Health state of one upstream host
#[derive(Debug)]
pub struct HostHealth {
    /// Low 32 bits: consecutive failures. Bit 32: down.
    state: AtomicU64,
    /// 0 disables down-marking
    max_fails: u32,
    probes: AtomicU64,
    failed_probes: AtomicU64,
    times_down: AtomicU64,
    recoveries: AtomicU64,
    last_probe: RwLock<Option<Instant>>,
}

impl HostHealth {
    /// Create an up host with a zero failure count
    pub fn new(max_fails: u32) -> Self {
        Self {
            state: AtomicU64::new(pack(0, false)),
            max_fails,
            probes: AtomicU64::new(0),
            failed_probes: AtomicU64::new(0),
            times_down: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            last_probe: RwLock::new(None),
        }
    }

    /// Configured failure threshold
    pub fn max_fails(&self) -> u32 {
        self.max_fails
    }

    /// Returns true if the host is currently classified up
    #[inline]
    pub fn is_up(&self) -> bool {
        self.snapshot().up
    }

    /// Current consecutive failure count
    #[inline]
    pub fn consecutive_failures(&self) -> u32 {
        self.snapshot().consecutive_failures
    }

    /// Counter and classification from a single load
    #[inline]
    pub fn snapshot(&self) -> HealthSnapshot {
        let (consecutive_failures, down) = unpack(self.state.load(Ordering::Acquire));
        HealthSnapshot {
            up: !down,
            consecutive_failures,
        }
    }

    /// When the last probe completed
    pub fn last_probe(&self) -> Option<Instant> {
        *self.last_probe.read()
    }

    /// Record a successful probe
    ///
    /// Resets the failure counter and brings a down host back up.
    pub fn record_success(&self) -> Transition {
        self.probes.fetch_add(1, Ordering::Relaxed);
        *self.last_probe.write() = Some(Instant::now());

        let previous = self.state.swap(pack(0, false), Ordering::AcqRel);
        let (_, was_down) = unpack(previous);
        if was_down {
            self.recoveries.fetch_add(1, Ordering::Relaxed);
            Transition::Recovered
        } else {
            Transition::None
        }
    }

    /// Record a failed probe
    ///
    /// Marks the host down once the counter reaches the threshold.
    pub fn record_failure(&self) -> Transition {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.failed_probes.fetch_add(1, Ordering::Relaxed);
        *self.last_probe.write() = Some(Instant::now());

        let max_fails = self.max_fails;
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                let (fails, down) = unpack(state);
                let fails = fails.saturating_add(1);
                let down = down || (max_fails > 0 && fails >= max_fails);
                Some(pack(fails, down))
            })
            .unwrap_or_else(|state| state);

        let (fails, was_down) = unpack(previous);
        let fails = fails.saturating_add(1);
        if !was_down && max_fails > 0 && fails >= max_fails {
            self.times_down.fetch_add(1, Ordering::Relaxed);
            Transition::WentDown
        } else {
            Transition::None
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> HealthStats {
        let snapshot = self.snapshot();
        HealthStats {
            up: snapshot.up,
            consecutive_failures: snapshot.consecutive_failures,
            probes: self.probes.load(Ordering::Relaxed),
            failed_probes: self.failed_probes.load(Ordering::Relaxed),
            times_down: self.times_down.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

impl Default for HostHealth {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILS)
    }
}
