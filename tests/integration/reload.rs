//! Domain list reload tests
//!
//! Tests cover:
//! - Lookups racing reloads only ever see one complete list
//! - The periodic reloader picking up a changed file
//! - A failed reload leaving the previous snapshot active

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dns_redirect::namelist::{DomainMatcher, ListSource};
use dns_redirect::upstream::HealthCheckSettings;
use dns_redirect::{Domain, UpstreamRouter};
use tempfile::TempDir;

use super::support::{wait_until, write_list_atomic};

// ============================================================================
// Helpers
// ============================================================================

fn list(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}.example")).collect()
}

fn name(s: &str) -> Domain {
    Domain::parse(s).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_see_whole_snapshots() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("list.conf");
    let list_a = list("a", 2000);
    let list_b = list("b", 2000);
    write_list_atomic(&path, &list_a);

    let matcher = Arc::new(DomainMatcher::new(vec![ListSource::new(&path)]));
    assert_eq!(matcher.reload().await.unwrap(), 2000);

    let done = Arc::new(AtomicBool::new(false));
    let checks = Arc::new(AtomicU64::new(0));
    let mut readers = Vec::new();

    for _ in 0..3 {
        let matcher = Arc::clone(&matcher);
        let done = Arc::clone(&done);
        let checks = Arc::clone(&checks);
        readers.push(tokio::spawn(async move {
            let probes = [name("a0.example"), name("a1999.example"), name("b0.example"), name("b1999.example")];
            while !done.load(Ordering::Relaxed) {
                let snapshot = matcher.snapshot();
                let hits: Vec<bool> = probes.iter().map(|p| snapshot.matches(p)).collect();
                let is_a = hits == [true, true, false, false];
                let is_b = hits == [false, false, true, true];
                assert!(is_a || is_b, "lookup saw a mixed snapshot: {hits:?}");
                assert_eq!(snapshot.len(), 2000);
                checks.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..20 {
        let next = if round % 2 == 0 { &list_b } else { &list_a };
        write_list_atomic(&path, next);
        matcher.reload().await.unwrap();
    }

    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.await.unwrap();
    }

    assert!(checks.load(Ordering::Relaxed) > 0);
    assert_eq!(matcher.stats().reloads, 21);
    assert_eq!(matcher.stats().failed_reloads, 0);
}

#[tokio::test]
async fn test_periodic_reload_picks_up_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cn.conf");
    write_list_atomic(&path, &["baidu.com".to_string()]);

    let router = UpstreamRouter::builder("cn")
        .source(&path)
        .reload_interval(Duration::from_millis(20))
        .health_check(HealthCheckSettings::default().with_interval(Duration::ZERO))
        .upstream("127.0.0.1:53")
        .build()
        .unwrap();

    router.start().await;
    assert!(router.matches("www.baidu.com"));
    assert!(!router.matches("www.qq.com"));

    // File timestamps can be coarse; make sure the rewrite gets a new mtime
    tokio::time::sleep(Duration::from_millis(50)).await;
    write_list_atomic(
        &path,
        &["# swapped".to_string(), "server=/qq.com/127.0.0.1".to_string()],
    );

    let picked_up = wait_until(Duration::from_secs(3), || router.matches("www.qq.com")).await;
    assert!(picked_up, "reloader never picked up the new list");
    assert!(!router.matches("www.baidu.com"));

    router.stop().await;
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.conf");
    let second = dir.path().join("second.conf");
    write_list_atomic(&first, &["example.com".to_string()]);
    write_list_atomic(&second, &["example.org".to_string()]);

    let matcher = DomainMatcher::new(vec![ListSource::new(&first), ListSource::new(&second)]);
    assert_eq!(matcher.reload().await.unwrap(), 2);

    std::fs::remove_file(&second).unwrap();
    write_list_atomic(&first, &["example.net".to_string()]);

    assert!(matcher.reload().await.is_err());
    assert!(matcher.matches(&name("www.example.com")));
    assert!(matcher.matches(&name("www.example.org")));
    assert!(!matcher.matches(&name("www.example.net")));
    assert_eq!(matcher.stats().failed_reloads, 1);
}
