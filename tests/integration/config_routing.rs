//! Configuration to routing, end to end
//!
//! Tests cover:
//! - Relative list paths resolved against the configuration file
//! - Blocks consulted in order, with exclusions falling through
//! - Per-block transport overrides reaching the hosts
//! - Environment overrides applied on top of the file

use std::path::Path;
use std::time::Duration;

use dns_redirect::config::{apply_env_overrides, load_config};
use dns_redirect::upstream::Protocol;
use dns_redirect::{ConfigError, Redirector};
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

const CONFIG: &str = r#"{
    "log": { "level": "debug" },
    "transport": { "timeout_ms": 500 },
    "redirects": [
        {
            "name": "cn",
            "sources": ["lists/cn.conf"],
            "reload_ms": 0,
            "except": ["ads.qq.com"],
            "policy": "round_robin",
            "spray": true,
            "health_check": { "interval_ms": 0 },
            "to": ["114.114.114.114", "tls://223.5.5.5"],
            "transport": { "force_tcp": true }
        },
        {
            "sources": ["/definitely/missing/list.conf", "lists/global.conf"],
            "reload_ms": 0,
            "health_check": { "interval_ms": 0 },
            "to": ["dns://8.8.8.8:5353"]
        }
    ]
}"#;

fn write_layout(dir: &Path) -> std::path::PathBuf {
    std::fs::create_dir_all(dir.join("lists")).unwrap();
    std::fs::write(
        dir.join("lists/cn.conf"),
        "# china list\nserver=/baidu.com/114.114.114.114\nqq.com\nbad..entry\n",
    )
    .unwrap();
    std::fs::write(dir.join("lists/global.conf"), "qq.com\ngoogle.com\n").unwrap();

    let path = dir.join("config.json");
    std::fs::write(&path, CONFIG).unwrap();
    path
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_config_file_routes_names() {
    let dir = TempDir::new().unwrap();
    let path = write_layout(dir.path());

    let config = load_config(&path).unwrap();
    assert_eq!(
        config.redirects[0].sources[0],
        dir.path().join("lists/cn.conf")
    );

    let redirector = Redirector::from_config(&config).unwrap();
    redirector.start().await;

    let cn = &redirector.routers()[0];
    assert_eq!(cn.name(), "cn");
    assert_eq!(cn.matcher().stats().patterns, 2);
    assert_eq!(cn.matcher().stats().malformed_entries, 1);
    assert_eq!(cn.hosts()[0].protocol(), Protocol::Tcp);
    assert_eq!(cn.hosts()[1].protocol(), Protocol::Tls);
    assert_eq!(cn.hosts()[0].transport().timeout(), Duration::from_millis(500));
    assert!(cn.balancer().spray());

    assert_eq!(redirector.route("www.baidu.com").unwrap().name(), "cn");
    assert_eq!(redirector.route("qq.com").unwrap().name(), "cn");

    // The second block failed its first load and stays empty
    assert_eq!(redirector.routers()[1].name(), "redirect1");
    assert!(redirector.route("ads.qq.com").is_none());
    assert!(redirector.route("www.google.com").is_none());

    redirector.stop().await;
}

#[tokio::test]
async fn test_second_block_catches_excluded_names() {
    let dir = TempDir::new().unwrap();
    let path = write_layout(dir.path());

    let mut config = load_config(&path).unwrap();
    config.redirects[1].sources.remove(0);

    let redirector = Redirector::from_config(&config).unwrap();
    redirector.start().await;

    assert_eq!(redirector.route("ads.qq.com").unwrap().name(), "redirect1");
    assert_eq!(redirector.route("www.google.com").unwrap().name(), "redirect1");
    assert_eq!(redirector.route("www.qq.com").unwrap().name(), "cn");
    assert!(redirector.route("example.org").is_none());

    let host = redirector.routers()[1].select().unwrap();
    assert_eq!(host.to_string(), "dns://8.8.8.8:5353");
    assert_eq!(host.protocol(), Protocol::Udp);

    redirector.stop().await;
}

#[test]
fn test_env_overrides_on_loaded_config() {
    let dir = TempDir::new().unwrap();
    let path = write_layout(dir.path());
    let mut config = load_config(&path).unwrap();

    apply_env_overrides(&mut config, |name| match name {
        "DNS_REDIRECT_FORCE_TCP" => Some("true".into()),
        "DNS_REDIRECT_RELOAD_MS" => Some("250".into()),
        _ => None,
    })
    .unwrap();

    assert!(config.transport.force_tcp);
    assert!(config.redirects.iter().all(|r| r.reload_ms == 250));

    let redirector = Redirector::from_config(&config).unwrap();
    assert_eq!(redirector.routers()[1].hosts()[0].protocol(), Protocol::Tcp);

    let err = apply_env_overrides(&mut config, |name| {
        (name == "DNS_REDIRECT_RELOAD_MS").then(|| "soon".to_string())
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::EnvError { .. }));
}

#[test]
fn test_unknown_policy_fails_to_build() {
    let dir = TempDir::new().unwrap();
    let path = write_layout(dir.path());
    let mut config = load_config(&path).unwrap();
    config.redirects[0].policy = "fastest".into();

    let err = Redirector::from_config(&config).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("fastest"));
}

#[test]
fn test_nameserver_file_in_to() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("lists")).unwrap();
    std::fs::create_dir_all(dir.path().join("upstreams")).unwrap();
    std::fs::write(dir.path().join("lists/cn.conf"), "baidu.com\n").unwrap();
    std::fs::write(
        dir.path().join("upstreams/cn.resolv"),
        "# isp resolvers\nnameserver 114.114.114.114\nnameserver 223.5.5.5\nsearch lan\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("upstreams/empty.resolv"), "search lan\n").unwrap();

    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "redirects": [{
                "sources": ["lists/cn.conf"],
                "to": ["tls://1.1.1.1", "upstreams/cn.resolv"]
            }]
        }"#,
    )
    .unwrap();

    let mut config = load_config(&path).unwrap();
    let redirector = Redirector::from_config(&config).unwrap();
    let hosts: Vec<String> = redirector.routers()[0]
        .hosts()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        hosts,
        ["tls://1.1.1.1:853", "dns://114.114.114.114:53", "dns://223.5.5.5:53"]
    );

    config.redirects[0].to = vec![dir.path().join("upstreams/empty.resolv").display().to_string()];
    let err = Redirector::from_config(&config).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("no entry was found"), "{err}");

    config.redirects[0].to = vec![dir.path().join("upstreams/missing.resolv").display().to_string()];
    let err = Redirector::from_config(&config).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_tls_material_errors_surface_when_building() {
    let dir = TempDir::new().unwrap();
    let path = write_layout(dir.path());
    let mut config = load_config(&path).unwrap();
    config.redirects[0].transport.tls = Some(dns_redirect::config::TlsConfig {
        ca_file: Some(dir.path().join("missing-ca.pem")),
        ..Default::default()
    });

    // The document itself is well formed
    config.validate().unwrap();

    let err = Redirector::from_config(&config).unwrap_err();
    assert!(matches!(err, dns_redirect::RedirectError::Tls { .. }), "{err}");
    assert!(err.is_config());
}
