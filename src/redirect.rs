//! Ordered set of redirect blocks
//!
//! A name is routed by the first block whose lists accept it; later blocks
//! are not consulted.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::domain::Domain;
use crate::error::RedirectResult;
use crate::router::UpstreamRouter;
use crate::upstream::{DnsProbe, Probe};

/// All configured redirect blocks
#[derive(Debug, Default)]
pub struct Redirector {
    routers: Vec<UpstreamRouter>,
}

impl Redirector {
    /// Wrap already-built routers, keeping their order
    pub fn new(routers: Vec<UpstreamRouter>) -> Self {
        Self { routers }
    }

    /// Build every block of `config` with the DNS liveness probe
    ///
    /// # Errors
    ///
    /// Returns the first configuration error encountered.
    pub fn from_config(config: &Config) -> RedirectResult<Self> {
        Self::from_config_with_probe(config, Arc::new(DnsProbe::new()))
    }

    /// Build every block of `config` with a custom probe
    ///
    /// # Errors
    ///
    /// Returns the first configuration error encountered.
    pub fn from_config_with_probe(config: &Config, probe: Arc<dyn Probe>) -> RedirectResult<Self> {
        let transport = config.transport.to_options();
        let routers = config
            .redirects
            .iter()
            .enumerate()
            .map(|(i, redirect)| {
                UpstreamRouter::from_config(
                    redirect.display_name(i),
                    redirect,
                    &transport,
                    Arc::clone(&probe),
                )
            })
            .collect::<RedirectResult<Vec<_>>>()?;

        Ok(Self::new(routers))
    }

    /// Blocks in consultation order
    pub fn routers(&self) -> &[UpstreamRouter] {
        &self.routers
    }

    /// First block that accepts `name`
    pub fn route(&self, name: &str) -> Option<&UpstreamRouter> {
        let Some(domain) = Domain::parse(name) else {
            warn!(name, "Not a valid domain name");
            return None;
        };
        self.routers.iter().find(|router| router.matches_domain(&domain))
    }

    /// Start every block
    pub async fn start(&self) {
        for router in &self.routers {
            router.start().await;
        }
        info!(redirects = self.routers.len(), "All redirects started");
    }

    /// Stop every block
    pub async fn stop(&self) {
        for router in &self.routers {
            router.stop().await;
        }
        info!(redirects = self.routers.len(), "All redirects stopped");
    }
}
