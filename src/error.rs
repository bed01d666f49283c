//! Error types for dns-redirect
//!
//! Two layers are defined here:
//!
//! - [`ConfigError`]: failures while loading and validating the configuration
//!   document. These are always fatal and stop startup.
//! - [`RedirectError`]: failures inside the routing engine. Construction-time
//!   variants (bad scheme, bad address, bad TLS material) are fatal; everything
//!   raised after `start()` (probe failures, dispatch failures, spray
//!   exhaustion) is reported per query or per probe and never escalates.
//!
//! # Example
//!
//! ```
//! use dns_redirect::RedirectError;
//!
//! let err = RedirectError::timeout("probe 1.1.1.1:53", std::time::Duration::from_millis(1500));
//! assert!(err.is_recoverable());
//! assert!(err.to_string().contains("timed out"));
//! ```

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Error types for the routing engine
#[derive(Debug, Error)]
pub enum RedirectError {
    /// Configuration document could not be loaded
    #[error("Configuration error: {0}")]
    Load(#[from] ConfigError),

    /// Invalid engine configuration
    ///
    /// Raised while building routers, hosts and transports. `field` names the
    /// offending directive when known.
    #[error("Invalid configuration{}: {reason}", .field.as_ref().map(|f| format!(" for '{f}'")).unwrap_or_default())]
    Config {
        /// Description of the problem
        reason: String,
        /// The configuration field involved, if any
        field: Option<String>,
    },

    /// Upstream address uses a transport scheme other than `dns://` or `tls://`
    #[error("Unsupported transport scheme '{scheme}' in upstream '{address}'")]
    UnsupportedScheme {
        /// The scheme as written
        scheme: String,
        /// The full address string
        address: String,
    },

    /// Upstream address could not be parsed
    #[error("Invalid upstream address '{address}': {reason}")]
    InvalidAddress {
        /// The address string as written
        address: String,
        /// What was wrong with it
        reason: String,
    },

    /// TLS material could not be loaded or assembled
    #[error("TLS configuration error: {reason}")]
    Tls {
        /// Description of the TLS failure
        reason: String,
    },

    /// A domain-list source could not be read
    #[error("Failed to read domain list {}: {source}", .path.display())]
    SourceRead {
        /// The source path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Network I/O error
    #[error("Network error: {reason}")]
    Network {
        /// Description of the network failure
        reason: String,
        /// The underlying I/O error, if available
        #[source]
        source: Option<io::Error>,
    },

    /// An operation exceeded its deadline
    #[error("Operation timed out after {timeout:?}: {context}")]
    Timeout {
        /// Description of what timed out
        context: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// Upstream returned something unusable
    #[error("Upstream error ({upstream}): {reason}")]
    Upstream {
        /// The upstream address
        upstream: String,
        /// Description of the failure
        reason: String,
    },

    /// No upstream is configured for the route
    #[error("No upstream available: {reason}")]
    NoUpstream {
        /// Why no upstream could be used
        reason: String,
    },

    /// Spray tried every host and none succeeded
    #[error("All {attempts} upstream attempts failed, last error: {last_error}")]
    Exhausted {
        /// Number of hosts tried
        attempts: usize,
        /// Error reported by the last host tried
        last_error: String,
    },
}

impl RedirectError {
    /// Create a configuration error without a field
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_field(reason: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a TLS error
    pub fn tls(reason: impl Into<String>) -> Self {
        Self::Tls {
            reason: reason.into(),
        }
    }

    /// Create a network error from an I/O error
    pub fn network_io(reason: impl Into<String>, source: io::Error) -> Self {
        Self::Network {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            timeout,
        }
    }

    /// Create an upstream error
    pub fn upstream(upstream: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            upstream: upstream.into(),
            reason: reason.into(),
        }
    }

    /// Create a no-upstream error
    pub fn no_upstream(reason: impl Into<String>) -> Self {
        Self::NoUpstream {
            reason: reason.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Runtime failures (network, timeout, upstream, source reads, exhaustion)
    /// are recoverable; anything produced while building the engine is not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Upstream { .. }
            | Self::SourceRead { .. }
            | Self::Exhausted { .. } => true,
            Self::Load(_)
            | Self::Config { .. }
            | Self::UnsupportedScheme { .. }
            | Self::InvalidAddress { .. }
            | Self::Tls { .. }
            | Self::NoUpstream { .. } => false,
        }
    }

    /// Check if this error was raised while building the engine
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Load(_)
                | Self::Config { .. }
                | Self::UnsupportedScheme { .. }
                | Self::InvalidAddress { .. }
                | Self::Tls { .. }
        )
    }
}

/// Result alias for engine operations
pub type RedirectResult<T> = Result<T, RedirectError>;
