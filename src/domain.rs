//! Normalized DNS names
//!
//! A [`Domain`] is stored lower-cased and fully qualified (trailing dot), so
//! `Example.COM`, `example.com.` and `.example.com` all normalize to
//! `example.com.`. Membership checks elsewhere in the crate are suffix checks
//! over label boundaries, exposed here through [`Domain::suffixes`].
//!
//! # Example
//!
//! ```
//! use dns_redirect::Domain;
//!
//! let name = Domain::parse("WWW.Example.com").unwrap();
//! assert_eq!(name.as_str(), "www.example.com.");
//!
//! let suffixes: Vec<&str> = name.suffixes().collect();
//! assert_eq!(suffixes, ["www.example.com.", "example.com.", "com.", "."]);
//! ```

use std::fmt;

/// Maximum length of a single label in octets
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a name in presentation form, without the trailing dot
pub const MAX_NAME_LEN: usize = 253;

/// A lower-case, fully-qualified DNS name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Domain {
    name: String,
}

impl Domain {
    /// Parse and normalize a domain name
    ///
    /// Surrounding whitespace and a single leading dot are ignored; a trailing
    /// dot is optional. Returns `None` for empty labels, over-long labels or
    /// names, and characters other than ASCII letters, digits, `-` and `_`.
    /// A lone `.` parses as the root.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "." {
            return Some(Self::root());
        }

        let body = trimmed.strip_prefix('.').unwrap_or(trimmed);
        let body = body.strip_suffix('.').unwrap_or(body);
        if body.is_empty() || body.len() > MAX_NAME_LEN {
            return None;
        }

        for label in body.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return None;
            }
            if !label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
            {
                return None;
            }
        }

        let mut name = body.to_ascii_lowercase();
        name.push('.');
        Some(Self { name })
    }

    /// The root domain `.`
    pub fn root() -> Self {
        Self { name: ".".into() }
    }

    /// Normalized presentation form, always ending in `.`
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Returns true for the root domain
    pub fn is_root(&self) -> bool {
        self.name == "."
    }

    /// Number of labels, not counting the root
    pub fn label_count(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.name.bytes().filter(|&b| b == b'.').count()
        }
    }

    /// Iterate over this name and each parent, ending with the root
    ///
    /// Every yielded slice is itself a normalized name, so it can be looked
    /// up directly in a set of [`Domain::as_str`] values.
    pub fn suffixes(&self) -> Suffixes<'_> {
        Suffixes {
            rest: Some(&self.name),
        }
    }

    /// Returns true if `self` equals `parent` or lies beneath it
    pub fn is_subdomain_of(&self, parent: &Domain) -> bool {
        if parent.is_root() || self.name == parent.name {
            return true;
        }
        self.name.len() > parent.name.len()
            && self.name.ends_with(&parent.name)
            && self.name.as_bytes()[self.name.len() - parent.name.len() - 1] == b'.'
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// Iterator returned by [`Domain::suffixes`]
#[derive(Debug, Clone)]
pub struct Suffixes<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Suffixes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.rest?;
        self.rest = if current == "." {
            None
        } else {
            match current.find('.') {
                Some(idx) if idx + 1 < current.len() => Some(&current[idx + 1..]),
                _ => Some("."),
            }
        };
        Some(current)
    }
}
