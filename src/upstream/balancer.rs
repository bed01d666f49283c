//! Host selection policies
//!
//! Selection only considers hosts currently classified up. If every host is
//! down the full list is used instead, so a redirect block never becomes
//! unavailable just because its probes are failing.
//!
//! With spray enabled, a failed first pick is followed by every other host in
//! configuration order, each tried once.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use super::host::UpstreamHost;
use crate::error::RedirectError;

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Uniformly random host from the up-set
    #[default]
    Random,

    /// Cycle through the up-set in configuration order
    RoundRobin,

    /// First up host in configuration order
    Sequential,
}

impl Policy {
    /// Names accepted in configuration
    pub const SUPPORTED: [&'static str; 3] = ["random", "round_robin", "sequential"];

    /// Configuration name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round_robin",
            Self::Sequential => "sequential",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = RedirectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            "sequential" => Ok(Self::Sequential),
            other => Err(RedirectError::config_field(
                format!(
                    "unsupported policy \"{other}\", expected one of {}",
                    Self::SUPPORTED.join(", ")
                ),
                "policy",
            )),
        }
    }
}

/// Selection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalancerStats {
    /// Hosts selected
    pub selections: u64,
    /// Selections made from the full list because no host was up
    pub fallback_selections: u64,
}

/// Picks a host for each query
#[derive(Debug, Default)]
pub struct LoadBalancer {
    policy: Policy,
    spray: bool,
    rr_counter: AtomicUsize,
    selections: AtomicU64,
    fallback_selections: AtomicU64,
}

impl LoadBalancer {
    /// Create a balancer
    pub fn new(policy: Policy, spray: bool) -> Self {
        Self {
            policy,
            spray,
            ..Default::default()
        }
    }

    /// Configured policy
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Whether spray retry is enabled
    pub fn spray(&self) -> bool {
        self.spray
    }

    /// Index of the host to try first, or `None` for an empty list
    pub fn select_index(&self, hosts: &[Arc<UpstreamHost>]) -> Option<usize> {
        if hosts.is_empty() {
            return None;
        }

        let up: Vec<usize> = hosts
            .iter()
            .enumerate()
            .filter(|(_, host)| host.is_up())
            .map(|(i, _)| i)
            .collect();

        self.selections.fetch_add(1, Ordering::Relaxed);
        let index = if up.is_empty() {
            self.fallback_selections.fetch_add(1, Ordering::Relaxed);
            debug!(
                hosts = hosts.len(),
                policy = %self.policy,
                "No upstream is up, selecting from all hosts"
            );
            self.pick(hosts.len(), |n| n)
        } else {
            self.pick(up.len(), |n| up[n])
        };

        Some(index)
    }

    /// Host to try first, or `None` for an empty list
    pub fn select<'a>(&self, hosts: &'a [Arc<UpstreamHost>]) -> Option<&'a Arc<UpstreamHost>> {
        self.select_index(hosts).map(|i| &hosts[i])
    }

    /// Order in which hosts are attempted for one query
    ///
    /// Yields `first`, then, with spray enabled, every other index below
    /// `len` in ascending order. Each index appears at most once.
    pub fn attempt_order(&self, first: usize, len: usize) -> impl Iterator<Item = usize> {
        let rest = if self.spray { len } else { 0 };
        std::iter::once(first).chain((0..rest).filter(move |&i| i != first))
    }

    /// Statistics snapshot
    pub fn stats(&self) -> BalancerStats {
        BalancerStats {
            selections: self.selections.load(Ordering::Relaxed),
            fallback_selections: self.fallback_selections.load(Ordering::Relaxed),
        }
    }

    /// Choose a position in `0..count` and map it to a host index
    fn pick(&self, count: usize, index_of: impl Fn(usize) -> usize) -> usize {
        let n = match self.policy {
            Policy::RoundRobin => self.rr_counter.fetch_add(1, Ordering::Relaxed) % count,
            Policy::Random => rand::thread_rng().gen_range(0..count),
            Policy::Sequential => 0,
        };
        index_of(n)
    }
}
