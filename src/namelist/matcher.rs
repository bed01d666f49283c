//! Reloadable domain matcher
//!
//! The current [`MembershipIndex`] lives behind an `ArcSwap`. Lookups take a
//! guard on the current snapshot and read only that snapshot; a reload builds
//! a complete replacement off to the side and publishes it with a single
//! `store`. Readers never block on a reload and never see a partial index.
//!
//! If any source fails to read, the whole cycle is abandoned and the previous
//! snapshot stays in service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::index::MembershipIndex;
use super::source::{ListSource, SourceStamp};
use crate::domain::Domain;
use crate::error::RedirectResult;
use crate::task::PeriodicTask;

/// Default interval between reload checks
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a reload attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new snapshot was published with this many patterns
    Reloaded(usize),
    /// No source changed since the last successful reload
    Unchanged,
}

/// Matcher statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    /// Patterns in the current snapshot
    pub patterns: usize,
    /// Snapshots published since creation
    pub reloads: u64,
    /// Reload cycles abandoned because a source failed
    pub failed_reloads: u64,
    /// Malformed lines skipped during the last successful reload
    pub malformed_entries: u64,
}

/// Domain matcher over one or more reloadable list files
#[derive(Debug)]
pub struct DomainMatcher {
    sources: Vec<ListSource>,
    index: ArcSwap<MembershipIndex>,
    /// Modification time and length seen by the last successful reload,
    /// per source
    stamps: Mutex<Vec<Option<SourceStamp>>>,
    /// Serializes rebuilds; lookups never touch it
    reload_lock: tokio::sync::Mutex<()>,
    reloads: AtomicU64,
    failed_reloads: AtomicU64,
    malformed_entries: AtomicU64,
}

impl DomainMatcher {
    /// Create a matcher with an empty index
    ///
    /// Nothing matches until the first reload.
    pub fn new(sources: Vec<ListSource>) -> Self {
        let stamps = vec![None; sources.len()];
        Self {
            sources,
            index: ArcSwap::from_pointee(MembershipIndex::empty()),
            stamps: Mutex::new(stamps),
            reload_lock: tokio::sync::Mutex::new(()),
            reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            malformed_entries: AtomicU64::new(0),
        }
    }

    /// Create a matcher serving a fixed pattern set
    ///
    /// A matcher built this way has no sources, and reloading it keeps the
    /// given patterns.
    pub fn from_patterns<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = Domain>,
    {
        let matcher = Self::new(Vec::new());
        matcher
            .index
            .store(Arc::new(MembershipIndex::from_domains(domains)));
        matcher
    }

    /// Configured sources
    pub fn sources(&self) -> &[ListSource] {
        &self.sources
    }

    /// Returns true if `name` is covered by the current snapshot
    #[inline]
    pub fn matches(&self, name: &Domain) -> bool {
        self.index.load().matches(name)
    }

    /// Pattern in the current snapshot that covers `name`
    pub fn matched_pattern(&self, name: &Domain) -> Option<String> {
        self.index.load().matched_pattern(name).map(str::to_owned)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<MembershipIndex> {
        self.index.load_full()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            patterns: self.index.load().len(),
            reloads: self.reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            malformed_entries: self.malformed_entries.load(Ordering::Relaxed),
        }
    }

    /// Rebuild the index from every source and publish it
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::SourceRead` if any source cannot be read. The
    /// previous snapshot is kept in that case.
    pub async fn reload(&self) -> RedirectResult<usize> {
        let _guard = self.reload_lock.lock().await;
        self.rebuild().await
    }

    /// Rebuild only if some source's modification time or length changed
    ///
    /// # Errors
    ///
    /// Same as [`DomainMatcher::reload`].
    pub async fn reload_if_changed(&self) -> RedirectResult<ReloadOutcome> {
        let _guard = self.reload_lock.lock().await;

        let mut current = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            current.push(source.stamp().await);
        }

        let changed = {
            let stamps = self.stamps.lock();
            // A source whose stamp is unknown is always re-read
            current.iter().any(Option::is_none) || *stamps != current
        };
        if !changed {
            trace!(sources = self.sources.len(), "Domain lists unchanged, skipping reload");
            return Ok(ReloadOutcome::Unchanged);
        }

        self.rebuild().await.map(ReloadOutcome::Reloaded)
    }

    async fn rebuild(&self) -> RedirectResult<usize> {
        if self.sources.is_empty() {
            return Ok(self.index.load().len());
        }

        let started = Instant::now();
        let mut domains = Vec::new();
        let mut stamps = Vec::with_capacity(self.sources.len());
        let mut malformed = 0usize;

        for source in &self.sources {
            let stamp = source.stamp().await;
            let parsed = match source.load().await {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            };
            debug!(
                path = %source.path().display(),
                entries = parsed.domains.len(),
                malformed = parsed.malformed,
                "Read domain list"
            );
            malformed += parsed.malformed;
            domains.extend(parsed.domains);
            stamps.push(stamp);
        }

        let index = MembershipIndex::from_domains(domains);
        let count = index.len();
        self.index.store(Arc::new(index));
        *self.stamps.lock() = stamps;
        self.reloads.fetch_add(1, Ordering::Relaxed);
        self.malformed_entries
            .store(malformed as u64, Ordering::Relaxed);

        info!(
            patterns = count,
            sources = self.sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Domain lists reloaded"
        );
        Ok(count)
    }

    /// Spawn the periodic reload loop
    ///
    /// Each tick calls [`DomainMatcher::reload_if_changed`]; failures are
    /// logged and the previous snapshot stays active.
    pub fn spawn_reloader(self: &Arc<Self>, name: &str, interval: Duration) -> PeriodicTask {
        let matcher = Arc::clone(self);
        PeriodicTask::spawn(format!("{name}/reload"), interval, move || {
            let matcher = Arc::clone(&matcher);
            async move {
                if let Err(e) = matcher.reload_if_changed().await {
                    warn!(error = %e, "Domain list reload failed, keeping previous snapshot");
                }
            }
        })
    }
}
