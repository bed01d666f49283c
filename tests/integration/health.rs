//! Health monitor tests with the DNS probe against local UDP servers
//!
//! Tests cover:
//! - A silent host going down while a live host stays up
//! - Selection skipping the down host
//! - A host recovering after it starts answering again

use std::time::Duration;

use dns_redirect::upstream::{HealthCheckSettings, Policy, TransportOptions};
use dns_redirect::{Domain, UpstreamRouter};

use super::support::{wait_until, Responder};

fn monitored_router(responders: &[&Responder]) -> UpstreamRouter {
    UpstreamRouter::builder("health")
        .patterns([Domain::parse("example.com").unwrap()])
        .upstreams(responders.iter().map(|r| r.addr.to_string()))
        .policy(Policy::Sequential)
        .reload_interval(Duration::ZERO)
        .max_fails(2)
        .health_check(
            HealthCheckSettings::default()
                .with_interval(Duration::from_millis(50))
                .with_timeout(Duration::from_millis(100)),
        )
        .transport(TransportOptions::new().with_timeout(Duration::from_millis(100)))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_silent_host_goes_down_and_is_skipped() {
    let silent = Responder::silent().await;
    let live = Responder::answering().await;
    let router = monitored_router(&[&silent, &live]);

    // Sequential prefers the first host while everything is up
    assert_eq!(router.select().unwrap().socket_addr(), silent.addr);

    router.start().await;
    let went_down = wait_until(Duration::from_secs(3), || !router.hosts()[0].is_up()).await;
    assert!(went_down, "silent host was never marked down");

    assert!(router.hosts()[1].is_up());
    assert!(live.received() > 0);
    assert_eq!(router.select().unwrap().socket_addr(), live.addr);

    let live_stats = router.hosts()[1].health().stats();
    assert!(live_stats.probes > 0);
    assert_eq!(live_stats.failed_probes, 0);
    assert_eq!(router.hosts()[1].health().consecutive_failures(), 0);

    router.stop().await;
    assert!(!router.monitor().is_running());
}

#[tokio::test]
async fn test_host_recovers_when_it_answers_again() {
    let flaky = Responder::silent().await;
    let router = monitored_router(&[&flaky]);
    router.start().await;

    let went_down = wait_until(Duration::from_secs(3), || !router.hosts()[0].is_up()).await;
    assert!(went_down, "host was never marked down");

    // With every host down selection falls back to the full set
    assert_eq!(router.select().unwrap().socket_addr(), flaky.addr);

    flaky.set_answering(true);
    let recovered = wait_until(Duration::from_secs(3), || router.hosts()[0].is_up()).await;
    assert!(recovered, "host never recovered");
    assert_eq!(router.hosts()[0].health().consecutive_failures(), 0);
    assert!(router.hosts()[0].health().stats().recoveries >= 1);

    router.stop().await;
}
