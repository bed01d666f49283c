//! Upstream hosts, their health, and how one is chosen
//!
//! # Architecture
//!
//! ```text
//!            ┌───────────────────────────────┐
//!            │        HealthMonitor          │
//!            │  PeriodicTask per host ──probe──> upstream
//!            └──────────────┬────────────────┘
//!                           │ record_success / record_failure
//!                           v
//!   UpstreamHost { address, HostTransport, HostHealth }
//!                           ^
//!                           │ is_up
//!            ┌──────────────┴────────────────┐
//!            │ LoadBalancer (Policy, spray)  │
//!            └───────────────────────────────┘
//! ```

mod balancer;
mod health;
mod host;
mod monitor;
mod nameservers;
mod probe;
pub mod transport;

pub use balancer::{BalancerStats, LoadBalancer, Policy};
pub use health::{HealthSnapshot, HealthStats, HostHealth, Transition, DEFAULT_MAX_FAILS};
pub use host::UpstreamHost;
pub use monitor::{
    check_host, HealthCheckSettings, HealthMonitor, DEFAULT_CHECK_INTERVAL, DEFAULT_CHECK_TIMEOUT,
};
pub use nameservers::{expand_upstreams, parse_nameservers, read_nameservers, UpstreamEntry};
pub use probe::{DnsProbe, Probe};
pub use transport::{
    select_protocol, HostTransport, Protocol, Scheme, TlsOptions, TransportOptions,
    TransportOverrides, UpstreamAddress,
};
