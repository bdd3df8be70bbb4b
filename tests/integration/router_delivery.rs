//! Router delivery against mock HTTP endpoints

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use chrono::Utc;
use health_sentinel::{
    actors::{
        messages::{DeliveryOutcome, DeliveryReport},
        router::RouterHandle,
    },
    alerts::{Dispatch, DispatchKind},
    model::{Fingerprint, Severity},
    probes::ProbeRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::resolve;

fn dispatch(id: u64, channel: &str, kind: DispatchKind) -> Dispatch {
    Dispatch {
        id,
        channel: channel.to_string(),
        kind,
        fingerprint: Fingerprint::compute("api", "health", &BTreeMap::new()),
        rule: "api-down".to_string(),
        service: "api".to_string(),
        severity: Severity::Critical,
        title: "[CRITICAL] api-down: api".to_string(),
        message: "api is unhealthy".to_string(),
        created_at: Utc::now(),
    }
}

/// Router over the given channel definitions
fn router(channels: Value) -> (RouterHandle, mpsc::Sender<Dispatch>, broadcast::Receiver<DeliveryReport>) {
    let config = resolve(json!({ "channels": channels }), &ProbeRegistry::new());
    let (dispatch_tx, dispatch_rx) = mpsc::channel(16);
    let router = RouterHandle::spawn(config.channels, dispatch_rx).unwrap();
    let reports = router.subscribe();
    (router, dispatch_tx, reports)
}

async fn next_report(reports: &mut broadcast::Receiver<DeliveryReport>) -> DeliveryReport {
    tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("delivery should finish")
        .unwrap()
}

fn webhook(name: &str, url: String, retries: u32) -> Value {
    json!({
        "name": name,
        "type": "webhook",
        "config": { "url": url, "headers": { "X-Sentinel": "test" } },
        "retries": retries,
        "backoff": { "initial_ms": 10, "jitter": 0.0 }
    })
}

#[tokio::test]
async fn test_webhook_retries_then_delivers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({ "service": "api", "kind": "firing" })))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let (router, dispatch_tx, mut reports) = router(json!([webhook("hook", format!("{}/hook", server.uri()), 3)]));
    dispatch_tx.send(dispatch(1, "hook", DispatchKind::Firing)).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.dispatch_id, 1);
    assert_matches!(report.outcome, DeliveryOutcome::Delivered { attempts: 3, .. });

    let stats = router.stats();
    assert_eq!((stats.delivered, stats.retries, stats.failed), (1, 2, 0));

    router.shutdown().await.unwrap();
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].headers.get("x-sentinel").unwrap(), "test");
}

#[tokio::test]
async fn test_exhausted_retries_are_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;

    let (router, dispatch_tx, mut reports) = router(json!([webhook("hook", server.uri(), 1)]));
    dispatch_tx.send(dispatch(7, "hook", DispatchKind::Firing)).await.unwrap();

    let report = next_report(&mut reports).await;
    assert!(!report.is_delivered());
    let DeliveryOutcome::Failed { attempts, error } = report.outcome else {
        panic!("expected a failed delivery");
    };
    assert_eq!(attempts, 2);
    assert!(error.contains("503"), "unexpected error: {error}");
    assert_eq!(router.stats().failed, 1);

    router.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let (router, dispatch_tx, mut reports) = router(json!([webhook("hook", server.uri(), 5)]));
    dispatch_tx.send(dispatch(2, "hook", DispatchKind::Firing)).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_matches!(report.outcome, DeliveryOutcome::Failed { attempts: 1, .. });
    assert_eq!(router.stats().retries, 0);

    router.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&broken)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&healthy)
        .await;

    let mut slow = webhook("slow", broken.uri(), 0);
    slow["timeout"] = json!(1);
    let (router, dispatch_tx, mut reports) = router(json!([slow, webhook("fast", healthy.uri(), 0)]));

    dispatch_tx.send(dispatch(1, "slow", DispatchKind::Firing)).await.unwrap();
    dispatch_tx.send(dispatch(2, "fast", DispatchKind::Firing)).await.unwrap();

    let first = next_report(&mut reports).await;
    assert_eq!(first.channel, "fast");
    assert!(first.is_delivered());

    let second = next_report(&mut reports).await;
    assert_eq!(second.channel, "slow");
    let DeliveryOutcome::Failed { error, .. } = second.outcome else {
        panic!("expected a timeout");
    };
    assert_eq!(error, "delivery timed out after 1000ms");

    router.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_channel_rate_limit_throttles_instead_of_dropping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let mut channel = webhook("hook", server.uri(), 0);
    channel["rate_limit"] = json!({ "max": 1, "window_secs": 1 });
    let (router, dispatch_tx, mut reports) = router(json!([channel]));

    let started = Instant::now();
    dispatch_tx.send(dispatch(1, "hook", DispatchKind::Firing)).await.unwrap();
    dispatch_tx.send(dispatch(2, "hook", DispatchKind::Firing)).await.unwrap();

    assert!(next_report(&mut reports).await.is_delivered());
    assert!(next_report(&mut reports).await.is_delivered());
    assert!(started.elapsed() >= Duration::from_millis(500));

    let stats = router.stats();
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.throttled, 1);

    router.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pager_trigger_and_resolve_share_dedup_key() {
    let server = MockServer::start().await;
    let fingerprint = Fingerprint::compute("api", "health", &BTreeMap::new());
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "event_action": "trigger", "dedup_key": fingerprint })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "event_action": "resolve", "dedup_key": fingerprint })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let (router, dispatch_tx, mut reports) = router(json!([{
        "name": "oncall",
        "type": "pager",
        "config": { "routing_key": "R0UT1NG", "url": server.uri() },
        "retries": 0
    }]));

    dispatch_tx.send(dispatch(1, "oncall", DispatchKind::Firing)).await.unwrap();
    assert!(next_report(&mut reports).await.is_delivered());
    dispatch_tx.send(dispatch(2, "oncall", DispatchKind::Resolved)).await.unwrap();
    let report = next_report(&mut reports).await;
    assert_eq!(report.kind, DispatchKind::Resolved);
    assert_matches!(report.outcome, DeliveryOutcome::Delivered { attempts: 1, .. });

    router.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_accepted_deliveries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(3)
        .mount(&server)
        .await;

    let (router, dispatch_tx, _reports) = router(json!([webhook("hook", server.uri(), 0)]));
    for id in 0..3 {
        dispatch_tx.send(dispatch(id, "hook", DispatchKind::Firing)).await.unwrap();
    }

    router.shutdown().await.unwrap();
    assert_eq!(router.stats().delivered, 3);
}
