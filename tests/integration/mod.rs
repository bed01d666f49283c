//! Integration tests for dns-redirect
//!
//! # Test Organization
//!
//! - `reload`: list reloads racing concurrent lookups
//! - `spray`: dispatch and spray retry against local UDP responders
//! - `health`: the health monitor probing live and silent local servers
//! - `config_routing`: configuration file to routed names, end to end
//!
//! All servers bind to 127.0.0.1 on ephemeral ports; no external network
//! access is needed.

pub mod config_routing;
pub mod health;
pub mod reload;
pub mod spray;
pub mod support;
