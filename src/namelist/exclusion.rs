//! Static exclusion set
//!
//! Domains listed under `except` are carved out of an otherwise matching
//! redirect block. The set is fixed at construction and never reloaded.

use tracing::warn;

use super::index::MembershipIndex;
use crate::domain::Domain;

/// Domains (and their subdomains) excluded from a redirect block
#[derive(Debug, Default, Clone)]
pub struct ExclusionSet {
    index: MembershipIndex,
}

impl ExclusionSet {
    /// Build the set from raw entries
    ///
    /// Entries that are not valid domain names are dropped with a warning.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = entries.into_iter().filter_map(|entry| {
            let entry = entry.as_ref();
            let parsed = Domain::parse(entry);
            if parsed.is_none() {
                warn!(entry, "Ignoring invalid exclusion entry");
            }
            parsed
        });

        Self {
            index: MembershipIndex::from_domains(domains),
        }
    }

    /// Returns true if `name` is excluded
    #[inline]
    pub fn matches(&self, name: &Domain) -> bool {
        self.index.matches(name)
    }

    /// Number of excluded patterns
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
