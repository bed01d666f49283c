//! Immutable suffix-membership snapshot
//!
//! Patterns are stored in normalized form (`example.com.`). A lookup walks the
//! queried name's suffixes from leaf to root and probes the set once per
//! label, so the cost is bounded by the label count of the query and not by
//! the number of patterns.

use ahash::AHashSet;

use crate::domain::Domain;

/// A set of domain patterns answering "is this name equal to, or beneath, a
/// pattern?"
#[derive(Debug, Default, Clone)]
pub struct MembershipIndex {
    patterns: AHashSet<String>,
}

impl MembershipIndex {
    /// Create an empty index
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from parsed domains
    pub fn from_domains<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = Domain>,
    {
        let patterns = domains
            .into_iter()
            .map(|d| d.as_str().to_owned())
            .collect();
        Self { patterns }
    }

    /// Returns true if `name` equals or is a subdomain of any pattern
    #[inline]
    pub fn matches(&self, name: &Domain) -> bool {
        self.matched_pattern(name).is_some()
    }

    /// Return the most specific pattern covering `name`, if any
    pub fn matched_pattern(&self, name: &Domain) -> Option<&str> {
        if self.patterns.is_empty() {
            return None;
        }
        name.suffixes()
            .find_map(|suffix| self.patterns.get(suffix).map(String::as_str))
    }

    /// Number of distinct patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if there are no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
