//! dns-redirect: domain-matched, health-checked upstream DNS routing
//!
//! This crate decides whether a DNS name belongs to a configured domain set
//! and, if so, which upstream server should answer it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Redirector                             │
//! │                                                                  │
//! │  ┌────────────────────── UpstreamRouter (per block) ──────────┐  │
//! │  │                                                            │  │
//! │  │  list files ──reload──> DomainMatcher ──> ExclusionSet     │  │
//! │  │                         (ArcSwap snapshot)                 │  │
//! │  │                                                            │  │
//! │  │  HealthMonitor ──probe──> UpstreamHost[] <── LoadBalancer  │  │
//! │  │  (task per host)          (transport,       (policy,       │  │
//! │  │                            health)           spray)        │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: normalized DNS names
//! - [`namelist`]: reloadable domain lists and exclusions
//! - [`upstream`]: hosts, transports, health checking and selection
//! - [`router`]: one redirect block with spray dispatch
//! - [`redirect`]: ordered redirect blocks
//! - [`config`]: JSON configuration
//! - [`task`]: periodic background tasks

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod domain;
pub mod error;
pub mod namelist;
pub mod redirect;
pub mod router;
pub mod task;
pub mod upstream;

pub use domain::Domain;
pub use error::{ConfigError, RedirectError, RedirectResult};
pub use redirect::Redirector;
pub use router::{RouterBuilder, RouterStats, UpstreamRouter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
