//! Upstream entries given as addresses or nameserver files
//!
//! Every `to` entry is either an upstream address (`[scheme://]ip[:port]`)
//! or the path of a resolv.conf-style file whose `nameserver` lines supply
//! the addresses:
//!
//! ```text
//! # /etc/dns-redirect/cn.resolv
//! nameserver 114.114.114.114
//! nameserver tls://223.5.5.5      ; scheme and port allowed as in `to`
//! search example.com              (ignored)
//! ```
//!
//! Files are read once, when the redirect block is built.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::transport::UpstreamAddress;
use crate::error::{RedirectError, RedirectResult};

/// One `to` entry before expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEntry {
    /// A literal upstream address
    Address(UpstreamAddress),
    /// A nameserver file
    File(PathBuf),
}

impl UpstreamEntry {
    /// Classify a `to` entry
    ///
    /// Entries with an explicit `scheme://` must be valid addresses. Anything
    /// else that does not parse as an address is taken as a file path.
    ///
    /// # Errors
    ///
    /// Returns the address error for entries with a scheme, and
    /// `RedirectError::InvalidAddress` for an empty entry.
    pub fn parse(entry: &str) -> RedirectResult<Self> {
        let trimmed = entry.trim();
        if trimmed.is_empty() || trimmed.contains("://") {
            return UpstreamAddress::parse(trimmed).map(Self::Address);
        }
        match UpstreamAddress::parse(trimmed) {
            Ok(address) => Ok(Self::Address(address)),
            Err(_) => Ok(Self::File(PathBuf::from(trimmed))),
        }
    }
}

/// Collect the `nameserver` addresses of a resolv.conf-style document
///
/// Comments start with `#` or `;`. Lines with other keywords are ignored;
/// `nameserver` values that are not valid addresses are skipped with a
/// warning.
pub fn parse_nameservers(origin: &Path, contents: &str) -> Vec<UpstreamAddress> {
    let mut addresses = Vec::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.split(['#', ';']).next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }
        let Some(value) = fields.next() else {
            warn!(path = %origin.display(), line = lineno + 1, "nameserver line without address");
            continue;
        };
        match UpstreamAddress::parse(value) {
            Ok(address) => addresses.push(address),
            Err(e) => warn!(
                path = %origin.display(),
                line = lineno + 1,
                error = %e,
                "Skipping unusable nameserver entry"
            ),
        }
    }

    addresses
}

/// Read the addresses of one nameserver file
///
/// # Errors
///
/// Returns a configuration error on the `to` field if the file cannot be
/// read or lists no usable nameserver.
pub fn read_nameservers(path: &Path) -> RedirectResult<Vec<UpstreamAddress>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RedirectError::config_field(
            format!(
                "'{}' is neither an upstream address nor a readable nameserver file: {e}",
                path.display()
            ),
            "to",
        )
    })?;

    let addresses = parse_nameservers(path, &contents);
    if addresses.is_empty() {
        return Err(RedirectError::config_field(
            format!("{} parsed as a nameserver file, yet no entry was found", path.display()),
            "to",
        ));
    }

    debug!(path = %path.display(), nameservers = addresses.len(), "Read nameserver file");
    Ok(addresses)
}

/// Expand `to` entries into addresses, in order
///
/// # Errors
///
/// Returns the first entry or file error encountered.
pub fn expand_upstreams<S: AsRef<str>>(entries: &[S]) -> RedirectResult<Vec<UpstreamAddress>> {
    let mut addresses = Vec::with_capacity(entries.len());
    for entry in entries {
        match UpstreamEntry::parse(entry.as_ref())? {
            UpstreamEntry::Address(address) => addresses.push(address),
            UpstreamEntry::File(path) => addresses.extend(read_nameservers(&path)?),
        }
    }
    Ok(addresses)
}
