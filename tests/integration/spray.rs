//! Dispatch and spray tests against local UDP servers
//!
//! Tests cover:
//! - Spray walking past silent hosts to the one that answers
//! - Without spray, the first timeout is returned to the caller
//! - Every host silent ends in `Exhausted`

use std::sync::Arc;
use std::time::Duration;

use dns_redirect::upstream::{DnsProbe, Policy, TransportOptions, UpstreamHost};
use dns_redirect::{Domain, RedirectError, RedirectResult, UpstreamRouter};

use super::support::{udp_exchange, Responder};

// ============================================================================
// Helpers
// ============================================================================

fn router(responders: &[&Responder], spray: bool) -> UpstreamRouter {
    UpstreamRouter::builder("spray")
        .patterns([Domain::parse("example.com").unwrap()])
        .upstreams(responders.iter().map(|r| r.addr.to_string()))
        .policy(Policy::Sequential)
        .spray(spray)
        .reload_interval(Duration::ZERO)
        .transport(TransportOptions::new().with_timeout(Duration::from_millis(200)))
        .build()
        .unwrap()
}

async fn exchange(host: Arc<UpstreamHost>, query: Vec<u8>) -> RedirectResult<Vec<u8>> {
    let addr = host.socket_addr();
    udp_exchange(addr, &query)
        .await
        .map_err(|e| RedirectError::network_io(format!("exchange with {addr}"), e))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_spray_reaches_answering_host() {
    let silent_a = Responder::silent().await;
    let silent_b = Responder::silent().await;
    let live = Responder::answering().await;
    let router = router(&[&silent_a, &silent_b, &live], true);
    let query = DnsProbe::build_query(0x1234).unwrap();

    let response = router
        .dispatch(|host| exchange(host, query.clone()))
        .await
        .unwrap();

    DnsProbe::check_response("live", 0x1234, &response).unwrap();
    assert_eq!(silent_a.received(), 1);
    assert_eq!(silent_b.received(), 1);
    assert_eq!(live.received(), 1);

    let stats = router.stats();
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.failed_dispatches, 0);
}

#[tokio::test]
async fn test_without_spray_first_timeout_is_returned() {
    let silent = Responder::silent().await;
    let live = Responder::answering().await;
    let router = router(&[&silent, &live], false);
    let query = DnsProbe::build_query(7).unwrap();

    let err = router
        .dispatch(|host| exchange(host, query.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, RedirectError::Timeout { .. }), "got {err}");
    assert_eq!(live.received(), 0);
    assert_eq!(router.stats().failed_dispatches, 1);
}

#[tokio::test]
async fn test_spray_exhausts_when_all_hosts_are_silent() {
    let silent_a = Responder::silent().await;
    let silent_b = Responder::silent().await;
    let router = router(&[&silent_a, &silent_b], true);
    let query = DnsProbe::build_query(9).unwrap();

    let err = router
        .dispatch(|host| exchange(host, query.clone()))
        .await
        .unwrap_err();

    match err {
        RedirectError::Exhausted { attempts, last_error } => {
            assert_eq!(attempts, 2);
            assert!(last_error.contains("timed out") || last_error.contains("timeout"), "{last_error}");
        }
        other => panic!("expected Exhausted, got {other}"),
    }
    assert_eq!(silent_a.received(), 1);
    assert_eq!(silent_b.received(), 1);
}
