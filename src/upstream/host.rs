//! Upstream host

use std::fmt;
use std::net::SocketAddr;

use super::health::HostHealth;
use super::transport::{HostTransport, Protocol, TransportOptions, UpstreamAddress};
use crate::error::RedirectResult;

/// One configured backend DNS server
///
/// Address and transport are fixed at construction; only the health state
/// changes afterwards.
#[derive(Debug)]
pub struct UpstreamHost {
    address: UpstreamAddress,
    transport: HostTransport,
    health: HostHealth,
}

impl UpstreamHost {
    /// Create a host from pre-built parts
    pub fn new(address: UpstreamAddress, transport: HostTransport, max_fails: u32) -> Self {
        Self {
            address,
            transport,
            health: HostHealth::new(max_fails),
        }
    }

    /// Parse `address` and derive its transport from `options`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported scheme, an invalid
    /// address or unusable TLS parameters.
    pub fn from_config(address: &str, options: &TransportOptions, max_fails: u32) -> RedirectResult<Self> {
        Self::from_address(UpstreamAddress::parse(address)?, options, max_fails)
    }

    /// Derive the transport for an already parsed address from `options`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unusable TLS parameters.
    pub fn from_address(
        address: UpstreamAddress,
        options: &TransportOptions,
        max_fails: u32,
    ) -> RedirectResult<Self> {
        let transport = HostTransport::build(options, &address)?;
        Ok(Self::new(address, transport, max_fails))
    }

    /// Parsed address
    pub fn address(&self) -> &UpstreamAddress {
        &self.address
    }

    /// Socket address to dial
    pub fn socket_addr(&self) -> SocketAddr {
        self.address.addr
    }

    /// Resolved transport
    pub fn transport(&self) -> &HostTransport {
        &self.transport
    }

    /// Wire protocol
    pub fn protocol(&self) -> Protocol {
        self.transport.protocol()
    }

    /// Health state
    pub fn health(&self) -> &HostHealth {
        &self.health
    }

    /// Shorthand for `health().is_up()`
    #[inline]
    pub fn is_up(&self) -> bool {
        self.health.is_up()
    }
}

impl fmt::Display for UpstreamHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let host = UpstreamHost::from_config("8.8.8.8", &TransportOptions::new(), 3).unwrap();
        assert_eq!(host.socket_addr(), "8.8.8.8:53".parse().unwrap());
        assert_eq!(host.protocol(), Protocol::Udp);
        assert!(host.is_up());
        assert_eq!(host.health().max_fails(), 3);
        assert_eq!(host.to_string(), "dns://8.8.8.8:53");
    }

    #[test]
    fn test_from_config_rejects_bad_scheme() {
        let err = UpstreamHost::from_config("https://8.8.8.8", &TransportOptions::new(), 3)
            .unwrap_err();
        assert!(err.is_config());
    }
}
