//! Per-host transport selection
//!
//! Every upstream host gets a [`HostTransport`] computed once at construction
//! from three inputs:
//!
//! 1. the address scheme (`dns://` or `tls://`, plain `ip[:port]` meaning `dns`)
//! 2. the global [`TransportOptions`]
//! 3. the redirect block's [`TransportOverrides`]
//!
//! Protocol precedence:
//!
//! ```text
//! TLS config present  ──> Tls
//! force_tcp           ──> Tcp
//! prefer_udp or dns:// ─> Udp
//! ```
//!
//! Only `tls://` hosts keep TLS parameters; for every other host they are
//! dropped before the protocol is chosen.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tracing::warn;

use crate::domain::Domain;
use crate::error::{RedirectError, RedirectResult};

/// Default port for plain DNS upstreams
pub const DNS_PORT: u16 = 53;

/// Default port for DNS-over-TLS upstreams
pub const TLS_PORT: u16 = 853;

/// Default dial/exchange timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default idle-connection expiry
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(10);

// ============================================================================
// Schemes and protocols
// ============================================================================

/// Transport scheme declared in an upstream address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain DNS, `dns://` or no scheme
    Dns,
    /// DNS over TLS, `tls://`
    Tls,
}

impl Scheme {
    /// Port used when the address omits one
    pub fn default_port(self) -> u16 {
        match self {
            Self::Dns => DNS_PORT,
            Self::Tls => TLS_PORT,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

/// Concrete wire protocol for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain UDP
    Udp,
    /// Plain TCP
    Tcp,
    /// TCP wrapped in TLS
    Tls,
}

impl Protocol {
    /// Returns true for connection-oriented protocols
    pub fn is_stream(self) -> bool {
        matches!(self, Self::Tcp | Self::Tls)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
            Self::Tls => write!(f, "tcp-tls"),
        }
    }
}

/// Choose the wire protocol for one host
///
/// `has_tls` must already reflect the scheme: only `tls://` hosts carry TLS
/// parameters.
pub fn select_protocol(scheme: Scheme, has_tls: bool, force_tcp: bool, prefer_udp: bool) -> Protocol {
    if has_tls {
        Protocol::Tls
    } else if force_tcp {
        Protocol::Tcp
    } else if prefer_udp || scheme == Scheme::Dns {
        Protocol::Udp
    } else {
        Protocol::Tcp
    }
}

// ============================================================================
// Upstream addresses
// ============================================================================

/// A parsed upstream address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamAddress {
    /// Declared scheme
    pub scheme: Scheme,
    /// Socket address to dial
    pub addr: SocketAddr,
}

impl UpstreamAddress {
    /// Parse `[scheme://]ip[:port]`
    ///
    /// IPv6 addresses with a port must be bracketed (`[::1]:53`); a bare IPv6
    /// address takes the scheme's default port. Host names are rejected.
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::UnsupportedScheme` for schemes other than
    /// `dns` and `tls`, and `RedirectError::InvalidAddress` otherwise.
    pub fn parse(input: &str) -> RedirectResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RedirectError::invalid_address(input, "empty address"));
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = match scheme.to_ascii_lowercase().as_str() {
                    "dns" => Scheme::Dns,
                    "tls" => Scheme::Tls,
                    _ => {
                        return Err(RedirectError::UnsupportedScheme {
                            scheme: scheme.to_string(),
                            address: trimmed.to_string(),
                        })
                    }
                };
                (scheme, rest)
            }
            None => (Scheme::Dns, trimmed),
        };

        let addr = if let Ok(addr) = rest.parse::<SocketAddr>() {
            addr
        } else if let Ok(ip) = rest.parse::<IpAddr>() {
            SocketAddr::new(ip, scheme.default_port())
        } else {
            let host = rest.trim_start_matches('[').trim_end_matches(']');
            match host.parse::<IpAddr>() {
                Ok(ip) => SocketAddr::new(ip, scheme.default_port()),
                Err(_) => {
                    return Err(RedirectError::invalid_address(
                        trimmed,
                        "expected an IP address with optional port",
                    ))
                }
            }
        };

        if addr.port() == 0 {
            return Err(RedirectError::invalid_address(trimmed, "port must not be 0"));
        }

        Ok(Self { scheme, addr })
    }
}

impl fmt::Display for UpstreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.addr)
    }
}

// ============================================================================
// Transport options
// ============================================================================

/// TLS parameters for `tls://` hosts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Name to verify the server certificate against; defaults to the host IP
    pub server_name: Option<String>,
    /// PEM file with trust anchors; defaults to the webpki root set
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate chain
    pub cert_file: Option<PathBuf>,
    /// PEM client private key
    pub key_file: Option<PathBuf>,
}

impl TlsOptions {
    /// Set the verification server name
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the CA bundle
    #[must_use]
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Set the client certificate and key
    #[must_use]
    pub fn with_client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = Some(key.into());
        self
    }

    /// Fill unset fields from `base`
    #[must_use]
    pub fn merged_over(self, base: &TlsOptions) -> TlsOptions {
        TlsOptions {
            server_name: self.server_name.or_else(|| base.server_name.clone()),
            ca_file: self.ca_file.or_else(|| base.ca_file.clone()),
            cert_file: self.cert_file.or_else(|| base.cert_file.clone()),
            key_file: self.key_file.or_else(|| base.key_file.clone()),
        }
    }
}

/// Transport settings shared by a group of hosts
///
/// `force_tcp` and `prefer_udp` are mutually exclusive and are changed only
/// through [`TransportOptions::set_force_tcp`] and
/// [`TransportOptions::set_prefer_udp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    force_tcp: bool,
    prefer_udp: bool,
    /// Per-exchange timeout
    pub timeout: Duration,
    /// Idle connection expiry
    pub expire: Duration,
    /// TLS parameters, applied to `tls://` hosts only
    pub tls: Option<TlsOptions>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            force_tcp: false,
            prefer_udp: false,
            timeout: DEFAULT_TIMEOUT,
            expire: DEFAULT_EXPIRE,
            tls: None,
        }
    }
}

impl TransportOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether TCP is forced for plain DNS hosts
    pub fn force_tcp(&self) -> bool {
        self.force_tcp
    }

    /// Whether UDP is preferred
    pub fn prefer_udp(&self) -> bool {
        self.prefer_udp
    }

    /// Force TCP, clearing `prefer_udp` with a warning if it was set
    pub fn set_force_tcp(&mut self) {
        if self.prefer_udp {
            warn!("force_tcp overrides previously set prefer_udp");
            self.prefer_udp = false;
        }
        self.force_tcp = true;
    }

    /// Prefer UDP; a no-op with a warning while `force_tcp` is active
    ///
    /// Returns true if the setting took effect.
    pub fn set_prefer_udp(&mut self) -> bool {
        if self.force_tcp {
            warn!("prefer_udp ignored because force_tcp is set");
            return false;
        }
        self.prefer_udp = true;
        true
    }

    /// Clear both protocol preferences
    pub fn clear_protocol_preference(&mut self) {
        self.force_tcp = false;
        self.prefer_udp = false;
    }

    /// Set the exchange timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the idle expiry
    #[must_use]
    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    /// Set TLS parameters
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Derive a new option set by applying `overrides` on top of `self`
    ///
    /// `prefer_udp` is applied before `force_tcp`, so a block that sets both
    /// ends up forcing TCP.
    #[must_use]
    pub fn with_overrides(&self, overrides: &TransportOverrides) -> TransportOptions {
        let mut derived = self.clone();

        match overrides.prefer_udp {
            Some(true) => {
                derived.set_prefer_udp();
            }
            Some(false) => derived.prefer_udp = false,
            None => {}
        }
        match overrides.force_tcp {
            Some(true) => derived.set_force_tcp(),
            Some(false) => derived.force_tcp = false,
            None => {}
        }
        if let Some(timeout) = overrides.timeout {
            derived.timeout = timeout;
        }
        if let Some(expire) = overrides.expire {
            derived.expire = expire;
        }
        if let Some(tls) = &overrides.tls {
            derived.tls = Some(match &self.tls {
                Some(base) => tls.clone().merged_over(base),
                None => tls.clone(),
            });
        }

        derived
    }
}

/// Optional per-block changes to the global [`TransportOptions`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOverrides {
    /// `Some(true)` forces TCP, `Some(false)` clears an inherited force
    pub force_tcp: Option<bool>,
    /// `Some(true)` prefers UDP, `Some(false)` clears an inherited preference
    pub prefer_udp: Option<bool>,
    /// Exchange timeout
    pub timeout: Option<Duration>,
    /// Idle expiry
    pub expire: Option<Duration>,
    /// TLS parameters, merged field by field over the inherited ones
    pub tls: Option<TlsOptions>,
}

// ============================================================================
// Host transport
// ============================================================================

/// Resolved, immutable transport for one host
#[derive(Clone)]
pub struct HostTransport {
    protocol: Protocol,
    timeout: Duration,
    expire: Duration,
    tls: Option<Arc<ClientConfig>>,
    server_name: Option<ServerName<'static>>,
}

impl fmt::Debug for HostTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostTransport")
            .field("protocol", &self.protocol)
            .field("timeout", &self.timeout)
            .field("expire", &self.expire)
            .field("tls", &self.tls.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl HostTransport {
    /// Build the transport for `address` from `options`
    ///
    /// TLS material is loaded here, so bad certificate paths surface as
    /// configuration errors.
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::Tls` if TLS parameters cannot be loaded, or
    /// `RedirectError::Config` for an invalid TLS server name.
    pub fn build(options: &TransportOptions, address: &UpstreamAddress) -> RedirectResult<Self> {
        let tls_options = match address.scheme {
            Scheme::Tls => Some(options.tls.clone().unwrap_or_default()),
            Scheme::Dns => None,
        };

        let protocol = select_protocol(
            address.scheme,
            tls_options.is_some(),
            options.force_tcp,
            options.prefer_udp,
        );

        let (tls, server_name) = match tls_options {
            Some(tls_options) => {
                let server_name = resolve_server_name(&tls_options, address.addr.ip())?;
                (Some(build_client_config(&tls_options)?), Some(server_name))
            }
            None => (None, None),
        };

        Ok(Self {
            protocol,
            timeout: options.timeout,
            expire: options.expire,
            tls,
            server_name,
        })
    }

    /// Plain transport with the given protocol, used by tests and tools
    pub fn plain(protocol: Protocol, timeout: Duration) -> Self {
        Self {
            protocol,
            timeout,
            expire: DEFAULT_EXPIRE,
            tls: None,
            server_name: None,
        }
    }

    /// Wire protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Exchange timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Idle connection expiry
    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// Client TLS configuration, present only for [`Protocol::Tls`]
    pub fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
        self.tls.as_ref()
    }

    /// Name verified during the TLS handshake
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }
}

fn resolve_server_name(options: &TlsOptions, ip: IpAddr) -> RedirectResult<ServerName<'static>> {
    match &options.server_name {
        Some(name) => {
            if Domain::parse(name).is_none() {
                return Err(RedirectError::config_field(
                    format!("invalid TLS server name '{name}'"),
                    "tls.server_name",
                ));
            }
            let name = name.trim_end_matches('.').to_string();
            ServerName::try_from(name.clone()).map_err(|e| {
                RedirectError::config_field(
                    format!("invalid TLS server name '{name}': {e}"),
                    "tls.server_name",
                )
            })
        }
        None => Ok(ServerName::IpAddress(ip.into())),
    }
}

fn install_crypto_provider() {
    static CRYPTO_INIT: OnceLock<()> = OnceLock::new();
    CRYPTO_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn build_client_config(options: &TlsOptions) -> RedirectResult<Arc<ClientConfig>> {
    install_crypto_provider();

    let roots = match &options.ca_file {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| {
                    RedirectError::tls(format!("invalid CA certificate in {}: {e}", path.display()))
                })?;
            }
            roots
        }
        None => RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    };

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = match (&options.cert_file, &options.key_file) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)
            .map_err(|e| RedirectError::tls(format!("invalid client certificate: {e}")))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(RedirectError::tls(
                "client certificate and key must be configured together",
            ))
        }
    };

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> RedirectResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| RedirectError::tls(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RedirectError::tls(format!("cannot parse {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(RedirectError::tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> RedirectResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| RedirectError::tls(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| RedirectError::tls(format!("cannot parse {}: {e}", path.display())))?
        .ok_or_else(|| RedirectError::tls(format!("no private key found in {}", path.display())))
}
