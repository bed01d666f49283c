//! dns-redirect daemon
//!
//! Loads the configuration, starts every redirect block (list reloads and
//! health probes) and runs until SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! dns-redirect
//!
//! # Validate a configuration file
//! dns-redirect -c /path/to/config.json --check
//!
//! # Show where a name would be routed
//! dns-redirect -c /path/to/config.json --match www.baidu.com
//!
//! # Run with environment overrides
//! DNS_REDIRECT_LOG_LEVEL=debug dns-redirect
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use dns_redirect::config::{load_config_with_env, Config};
use dns_redirect::{Domain, Redirector};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Check configuration only
    check_config: bool,
    /// Report the route for a name and exit
    match_name: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/dns-redirect/config.json");
        let mut check_config = false;
        let mut match_name = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => {
                    check_config = true;
                }
                "-m" | "--match" => {
                    match_name = args.next();
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("dns-redirect v{}", dns_redirect::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
            match_name,
        }
    }
}

fn print_help() {
    println!(
        r#"dns-redirect v{}

Routes DNS names from domain lists to health-checked upstream servers.

USAGE:
    dns-redirect [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/dns-redirect/config.json]
    --check                 Check configuration and exit
    -m, --match <NAME>      Print the redirect block and upstream chosen for NAME and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    DNS_REDIRECT_LOG_LEVEL   Override log level (trace, debug, info, warn, error)
    DNS_REDIRECT_LOG_FORMAT  Override log format (json, text)
    DNS_REDIRECT_RELOAD_MS   Override the reload interval of every redirect block
    DNS_REDIRECT_FORCE_TCP   Override the global force_tcp setting (true, false)
"#,
        dns_redirect::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Load the lists once and print how `name` would be routed
async fn report_match(redirector: &Redirector, name: &str) -> Result<()> {
    let domain = Domain::parse(name).with_context(|| format!("'{name}' is not a valid domain name"))?;

    for router in redirector.routers() {
        if let Err(e) = router.matcher().reload().await {
            eprintln!("{}: {e}", router.name());
        }
    }

    match redirector.route(name) {
        Some(router) => {
            let pattern = router
                .matcher()
                .matched_pattern(&domain)
                .unwrap_or_default();
            println!("{domain} -> {} (pattern {pattern})", router.name());
            if let Some(host) = router.select() {
                println!(
                    "  upstream {host} via {} (policy {}, spray {})",
                    host.protocol(),
                    router.balancer().policy(),
                    router.balancer().spray()
                );
            }
        }
        None => println!("{domain} -> not redirected"),
    }
    Ok(())
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    let config = load_config_with_env(&args.config_path)
        .with_context(|| format!("failed to load {}", args.config_path.display()))?;

    // Loads TLS material and upstream files
    let redirector = Redirector::from_config(&config)
        .with_context(|| format!("invalid configuration in {}", args.config_path.display()))?;

    if args.check_config {
        let hosts: usize = redirector.routers().iter().map(|r| r.hosts().len()).sum();
        println!(
            "Configuration is valid: {} redirect blocks, {hosts} upstreams",
            redirector.routers().len()
        );
        return Ok(());
    }

    init_logging(&config);

    info!("dns-redirect v{} starting", dns_redirect::VERSION);

    if let Some(name) = args.match_name {
        return report_match(&redirector, &name).await;
    }

    redirector.start().await;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    redirector.stop().await;

    for router in redirector.routers() {
        let stats = router.stats();
        let matcher = router.matcher().stats();
        info!(
            redirect = router.name(),
            matched = stats.matched,
            excluded = stats.excluded,
            dispatches = stats.dispatches,
            failed_dispatches = stats.failed_dispatches,
            reloads = matcher.reloads,
            failed_reloads = matcher.failed_reloads,
            "Final redirect stats"
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await;
}
