//! Configuration types for dns-redirect
//!
//! All durations are expressed in milliseconds. Defaults mirror the engine
//! constants: reload every 2000ms, probe every 2000ms with a 1500ms timeout,
//! three consecutive failures before a host is marked down.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::upstream::{Policy, TlsOptions, TransportOptions, TransportOverrides, UpstreamEntry};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Transport defaults inherited by every redirect block
    #[serde(default)]
    pub transport: TransportConfig,

    /// Redirect blocks, consulted in order
    pub redirects: Vec<RedirectConfig>,
}

impl Config {
    /// Validate the whole document
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate()?;
        self.transport.validate("transport")?;

        if self.redirects.is_empty() {
            return Err(ConfigError::ValidationError(
                "redirects: at least one redirect block is required".into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for (i, redirect) in self.redirects.iter().enumerate() {
            let name = redirect.display_name(i);
            if !names.insert(name.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "redirects[{i}].name: duplicate redirect name '{name}'"
                )));
            }
            redirect.validate(i)?;
        }

        Ok(())
    }

    /// Resolve relative source paths and nameserver file entries in `to`
    /// against `base_dir`
    ///
    /// Missing or non-regular sources only produce a warning; they may appear
    /// before the next reload. Nameserver files are checked when the block is
    /// built.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for (i, redirect) in self.redirects.iter_mut().enumerate() {
            for entry in &mut redirect.to {
                if let Ok(UpstreamEntry::File(path)) = UpstreamEntry::parse(entry) {
                    if path.is_relative() {
                        *entry = base_dir.join(path).display().to_string();
                    }
                }
            }

            for source in &mut redirect.sources {
                if source.is_relative() {
                    *source = base_dir.join(&*source);
                }
                match std::fs::metadata(&*source) {
                    Ok(meta) if meta.is_file() => {}
                    Ok(_) => warn!(
                        redirect = i,
                        path = %source.display(),
                        "Domain list source is not a regular file"
                    ),
                    Err(e) => warn!(
                        redirect = i,
                        path = %source.display(),
                        error = %e,
                        "Domain list source is not accessible yet"
                    ),
                }
            }
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

impl LogConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "log.level: unknown level '{other}'"
                )))
            }
        }
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "log.format: expected 'json' or 'text', got '{other}'"
            ))),
        }
    }
}

/// TLS parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Name verified against the server certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// CA bundle in PEM format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Client certificate chain in PEM format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,

    /// Client private key in PEM format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

impl TlsConfig {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(ConfigError::ValidationError(format!(
                "{field}: cert_file and key_file must be set together"
            )));
        }
        if let Some(name) = &self.server_name {
            if crate::domain::Domain::parse(name).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{field}.server_name: '{name}' is not a valid domain name"
                )));
            }
        }
        Ok(())
    }

    /// Convert to engine TLS options
    pub fn to_options(&self) -> TlsOptions {
        TlsOptions {
            server_name: self.server_name.clone(),
            ca_file: self.ca_file.clone(),
            cert_file: self.cert_file.clone(),
            key_file: self.key_file.clone(),
        }
    }
}

/// Global transport defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Use TCP for plain DNS upstreams
    #[serde(default)]
    pub force_tcp: bool,

    /// Use UDP for plain DNS upstreams
    #[serde(default)]
    pub prefer_udp: bool,

    /// Exchange timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Idle connection expiry in milliseconds
    #[serde(default = "default_expire_ms")]
    pub expire_ms: u64,

    /// TLS parameters for `tls://` upstreams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            force_tcp: false,
            prefer_udp: false,
            timeout_ms: default_timeout_ms(),
            expire_ms: default_expire_ms(),
            tls: None,
        }
    }
}

impl TransportConfig {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{field}.timeout_ms: must be greater than 0"
            )));
        }
        if let Some(tls) = &self.tls {
            tls.validate(&format!("{field}.tls"))?;
        }
        Ok(())
    }

    /// Convert to engine transport options
    ///
    /// `prefer_udp` is applied before `force_tcp`.
    pub fn to_options(&self) -> TransportOptions {
        let mut options = TransportOptions::new()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_expire(Duration::from_millis(self.expire_ms));
        if self.prefer_udp {
            options.set_prefer_udp();
        }
        if self.force_tcp {
            options.set_force_tcp();
        }
        if let Some(tls) = &self.tls {
            options = options.with_tls(tls.to_options());
        }
        options
    }
}

/// Per-block changes to the global transport defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportOverrideConfig {
    /// Force or un-force TCP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_tcp: Option<bool>,

    /// Prefer or un-prefer UDP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_udp: Option<bool>,

    /// Exchange timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Idle expiry in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_ms: Option<u64>,

    /// TLS parameters, merged over the global ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl TransportOverrideConfig {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "{field}.timeout_ms: must be greater than 0"
            )));
        }
        if let Some(tls) = &self.tls {
            tls.validate(&format!("{field}.tls"))?;
        }
        Ok(())
    }

    /// Convert to engine overrides
    pub fn to_overrides(&self) -> TransportOverrides {
        TransportOverrides {
            force_tcp: self.force_tcp,
            prefer_udp: self.prefer_udp,
            timeout: self.timeout_ms.map(Duration::from_millis),
            expire: self.expire_ms.map(Duration::from_millis),
            tls: self.tls.as_ref().map(TlsConfig::to_options),
        }
    }
}

/// Health check parameters of one redirect block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Probe interval in milliseconds; 0 disables probing
    #[serde(default = "default_check_interval_ms")]
    pub interval_ms: u64,

    /// Probe timeout in milliseconds
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive failures before a host is marked down; 0 never marks down
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_check_interval_ms(),
            timeout_ms: default_check_timeout_ms(),
            max_fails: default_max_fails(),
        }
    }
}

impl HealthCheckConfig {
    /// Probe interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One redirect block
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    /// Name used in logs; defaults to `redirect<N>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Domain-list files
    pub sources: Vec<PathBuf>,

    /// Reload check interval in milliseconds; 0 disables periodic reload
    #[serde(default = "default_reload_ms")]
    pub reload_ms: u64,

    /// Domains carved out of the lists
    #[serde(default)]
    pub except: Vec<String>,

    /// Selection policy name
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Retry every other host after a failed first pick
    #[serde(default)]
    pub spray: bool,

    /// Health check parameters
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Upstream addresses, `[dns://|tls://]ip[:port]`, or paths of
    /// resolv.conf-style nameserver files
    pub to: Vec<String>,

    /// Transport overrides for this block
    #[serde(default)]
    pub transport: TransportOverrideConfig,
}

impl RedirectConfig {
    /// Create a block with defaults for everything but sources and hosts
    pub fn new(sources: Vec<PathBuf>, to: Vec<String>) -> Self {
        Self {
            name: None,
            sources,
            reload_ms: default_reload_ms(),
            except: Vec::new(),
            policy: default_policy(),
            spray: false,
            health_check: HealthCheckConfig::default(),
            to,
            transport: TransportOverrideConfig::default(),
        }
    }

    /// Name used in logs for the block at position `index`
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("redirect{index}"))
    }

    /// Reload check interval
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_ms)
    }

    /// Validate the block at position `index`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the offending field.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let field = |name: &str| format!("redirects[{index}].{name}");

        if self.sources.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{}: at least one domain list is required",
                field("sources")
            )));
        }

        if self.to.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{}: missing mandatory property, at least one upstream is required",
                field("to")
            )));
        }
        for (i, entry) in self.to.iter().enumerate() {
            UpstreamEntry::parse(entry).map_err(|e| {
                ConfigError::ValidationError(format!("{}[{i}]: {e}", field("to")))
            })?;
        }

        self.policy
            .parse::<Policy>()
            .map_err(|e| ConfigError::ValidationError(format!("{}: {e}", field("policy"))))?;

        if self.health_check.interval_ms > 0 && self.health_check.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{}: must be greater than 0 when health checking is enabled",
                field("health_check.timeout_ms")
            )));
        }
        if self.health_check.max_fails > i32::MAX as u32 {
            return Err(ConfigError::ValidationError(format!(
                "{}: {} is out of range",
                field("health_check.max_fails"),
                self.health_check.max_fails
            )));
        }

        self.transport.validate(&field("transport"))
    }
}

// Default value functions

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    1500
}

fn default_expire_ms() -> u64 {
    10_000
}

fn default_reload_ms() -> u64 {
    2000
}

fn default_policy() -> String {
    Policy::default().as_str().into()
}

fn default_check_interval_ms() -> u64 {
    2000
}

fn default_check_timeout_ms() -> u64 {
    1500
}

fn default_max_fails() -> u32 {
    3
}
