//! Domain-list sources
//!
//! A source is a local, line-oriented file read wholesale on every reload.
//! Each line is one of:
//!
//! ```text
//! # comment                                   (skipped)
//!                                             (blank, skipped)
//! example.com                                 plain pattern
//! .example.org   # trailing comment           leading dot and comment allowed
//! server=/a.cn/b.cn/114.114.114.114           dnsmasq forwarding rule
//! ```
//!
//! Malformed lines are reported back to the caller, which logs them and
//! carries on with the rest of the file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::warn;

use crate::domain::Domain;
use crate::error::{RedirectError, RedirectResult};

/// Result of parsing one line of a domain list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListLine {
    /// Blank line or comment
    Skip,
    /// One or more patterns
    Entries(Vec<Domain>),
    /// Line that is neither a pattern nor a recognized directive
    Malformed,
}

/// Parse a single line of a domain list
pub fn parse_line(line: &str) -> ListLine {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        return ListLine::Skip;
    }

    if let Some(rule) = line.strip_prefix("server=") {
        return parse_dnsmasq_server(rule);
    }

    match Domain::parse(line) {
        Some(domain) => ListLine::Entries(vec![domain]),
        None => ListLine::Malformed,
    }
}

/// `server=/a.com/b.com/upstream`: every segment between the first and last
/// slash is a domain
fn parse_dnsmasq_server(rule: &str) -> ListLine {
    let Some(rest) = rule.strip_prefix('/') else {
        return ListLine::Malformed;
    };
    let Some(last_slash) = rest.rfind('/') else {
        return ListLine::Malformed;
    };

    let mut domains = Vec::new();
    for segment in rest[..last_slash].split('/') {
        match Domain::parse(segment) {
            Some(domain) => domains.push(domain),
            None => return ListLine::Malformed,
        }
    }

    if domains.is_empty() {
        ListLine::Malformed
    } else {
        ListLine::Entries(domains)
    }
}

/// Parsed contents of one source
#[derive(Debug, Default)]
pub struct ParsedList {
    /// Valid patterns, in file order
    pub domains: Vec<Domain>,
    /// Number of lines skipped as malformed
    pub malformed: usize,
}

/// Parse a whole list, logging a warning per malformed line
pub fn parse_list(origin: &Path, contents: &str) -> ParsedList {
    let mut parsed = ParsedList::default();

    for (lineno, line) in contents.lines().enumerate() {
        match parse_line(line) {
            ListLine::Skip => {}
            ListLine::Entries(mut domains) => parsed.domains.append(&mut domains),
            ListLine::Malformed => {
                parsed.malformed += 1;
                warn!(
                    path = %origin.display(),
                    line = lineno + 1,
                    entry = line.trim(),
                    "Skipping malformed domain list entry"
                );
            }
        }
    }

    parsed
}

/// Modification time and length of a source at one point in time
///
/// Two stamps differ if either field differs, so a rewrite that keeps the
/// old timestamp (`cp -p`, `rsync -t`) is still noticed when the size moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    /// Last modification time
    pub modified: SystemTime,
    /// File length in bytes
    pub len: u64,
}

/// A domain-list file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSource {
    path: PathBuf,
}

impl ListSource {
    /// Create a source for the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current modification time and length, or `None` if either cannot be
    /// determined
    pub async fn stamp(&self) -> Option<SourceStamp> {
        let meta = tokio::fs::metadata(&self.path).await.ok()?;
        let modified = meta.modified().ok()?;
        Some(SourceStamp {
            modified,
            len: meta.len(),
        })
    }

    /// Read and parse the whole file
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::SourceRead` if the file cannot be read.
    pub async fn load(&self) -> RedirectResult<ParsedList> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| RedirectError::SourceRead {
                path: self.path.clone(),
                source,
            })?;
        let contents = String::from_utf8_lossy(&bytes);
        Ok(parse_list(&self.path, &contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn entries(line: &str) -> Vec<String> {
        match parse_line(line) {
            ListLine::Entries(domains) => domains.iter().map(|d| d.to_string()).collect(),
            other => panic!("expected entries for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_blank_and_comments() {
        assert_eq!(parse_line(""), ListLine::Skip);
        assert_eq!(parse_line("   \t"), ListLine::Skip);
        assert_eq!(parse_line("# full line comment"), ListLine::Skip);
        assert_eq!(parse_line("   # indented comment"), ListLine::Skip);
    }

    #[test]
    fn test_plain_patterns() {
        assert_eq!(entries("example.com"), ["example.com."]);
        assert_eq!(entries("  .Example.org  "), ["example.org."]);
        assert_eq!(entries("example.net # note"), ["example.net."]);
    }

    #[test]
    fn test_dnsmasq_server_lines() {
        assert_eq!(
            entries("server=/baidu.com/114.114.114.114"),
            ["baidu.com."]
        );
        assert_eq!(
            entries("server=/a.cn/b.cn/223.5.5.5#53"),
            ["a.cn.", "b.cn."]
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(parse_line("not a domain"), ListLine::Malformed);
        assert_eq!(parse_line("server=baidu.com"), ListLine::Malformed);
        assert_eq!(parse_line("server=//114.114.114.114"), ListLine::Malformed);
        assert_eq!(parse_line("address=/a.com/1.2.3.4"), ListLine::Malformed);
        assert_eq!(parse_line("*.example.com"), ListLine::Malformed);
        assert_eq!(parse_line("server=/*.a.com/114.114.114.114"), ListLine::Malformed);
    }

    #[test]
    fn test_parse_list_counts_malformed() {
        let contents = "# header\nexample.com\nbad entry!\n\nserver=/a.cn/1.1.1.1\n";
        let parsed = parse_list(Path::new("test.conf"), contents);
        assert_eq!(parsed.domains.len(), 2);
        assert_eq!(parsed.malformed, 1);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "example.com").unwrap();
        writeln!(file, "example.org").unwrap();

        let source = ListSource::new(file.path());
        let parsed = source.load().await.unwrap();
        assert_eq!(parsed.domains.len(), 2);
        let stamp = source.stamp().await.unwrap();
        assert_eq!(stamp.len, "example.com\nexample.org\n".len() as u64);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let source = ListSource::new("/nonexistent/dns-redirect/list.conf");
        let err = source.load().await.unwrap_err();
        assert!(matches!(err, RedirectError::SourceRead { .. }));
        assert!(err.is_recoverable());
        assert!(source.stamp().await.is_none());
    }
}
