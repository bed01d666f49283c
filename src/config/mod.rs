//! Configuration module for dns-redirect
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use dns_redirect::config::load_config;
//!
//! let config = load_config("/etc/dns-redirect/config.json").unwrap();
//! println!("Redirect blocks: {}", config.redirects.len());
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, HealthCheckConfig, LogConfig, RedirectConfig, TlsConfig, TransportConfig,
    TransportOverrideConfig,
};
