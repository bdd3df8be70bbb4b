//! End-to-end: probe → scheduler → alert engine → router → webhook

use std::collections::BTreeMap;
use std::time::Duration;

use health_sentinel::{
    actors::messages::DeliveryReport,
    alerts::{AlertState, DispatchKind},
    model::{HealthEvent, HealthStatus, Severity},
    monitor::Monitor,
    probes::ProbeRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{Switch, eventually, resolve};

async fn next_report(reports: &mut broadcast::Receiver<DeliveryReport>) -> DeliveryReport {
    tokio::time::timeout(Duration::from_secs(10), reports.recv())
        .await
        .expect("a delivery should happen")
        .unwrap()
}

#[tokio::test]
async fn test_outage_fires_and_recovery_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "kind": "firing", "service": "checkout" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "kind": "resolved", "service": "checkout" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let probe = Switch::new(true);
    let mut registry = ProbeRegistry::new();
    registry.register("switch", probe.clone());

    let config = resolve(
        json!({
            "services": [{
                "name": "checkout",
                "type": "custom",
                "custom_check": "switch",
                "endpoint": "internal://checkout",
                "interval": 1,
                "timeout": 1,
                "retries": 1,
                "backoff": { "initial_ms": 10, "jitter": 0.0 }
            }],
            "channels": [{ "name": "hook", "type": "webhook", "config": { "url": server.uri() } }],
            "rules": [{
                "name": "checkout-down",
                "condition": { "statuses": ["unhealthy"] },
                "severity": "critical",
                "message_template": "{{service}} failed: {{error}}",
                "channels": ["hook"],
                "cooldown": 600
            }]
        }),
        &registry,
    );

    let monitor = Monitor::start(config).unwrap();
    let mut reports = monitor.delivery_reports();

    let fired = next_report(&mut reports).await;
    assert_eq!(fired.kind, DispatchKind::Firing);
    assert!(fired.is_delivered());

    // later failures stay within the cooldown and produce no deliveries
    probe.set_down(false);
    let resolved = next_report(&mut reports).await;
    assert_eq!(resolved.kind, DispatchKind::Resolved);
    assert_eq!(resolved.fingerprint, fired.fingerprint);

    let snapshot = monitor.snapshot().await.unwrap();
    assert_eq!(snapshot.services.len(), 1);
    assert_eq!(snapshot.services[0].service, "checkout");
    assert_eq!(snapshot.services[0].status, HealthStatus::Healthy);
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].state, AlertState::Resolved);

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.router.delivered, 2);
    assert_eq!(stats.open_alerts, 0);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_external_signals_share_the_engine() {
    let config = resolve(
        json!({
            "channels": [{ "name": "log", "type": "log" }],
            "rules": [{
                "name": "disk-full",
                "condition": { "signal": "disk_usage", "min_severity": "warning" },
                "severity": "warning",
                "message_template": "{{service}} disk usage high on {{dimensions.mount}}",
                "channels": ["log"]
            }]
        }),
        &ProbeRegistry::new(),
    );
    let monitor = Monitor::start(config).unwrap();
    let mut reports = monitor.delivery_reports();

    let dimensions = BTreeMap::from([("mount".to_string(), "/var".to_string())]);
    let event = HealthEvent::signal("web-01", "disk_usage", HealthStatus::Degraded, Severity::Warning, dimensions);
    monitor.event_sender().send(event.clone()).await.unwrap();

    let report = next_report(&mut reports).await;
    assert_eq!(report.channel, "log");
    assert_eq!(report.fingerprint, event.fingerprint);

    let snapshot = monitor.snapshot().await.unwrap();
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].message, "web-01 disk usage high on /var");
    // signals without a probe result leave the history untouched
    assert!(snapshot.services.is_empty());

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_drains_pending_events() {
    let config = resolve(
        json!({
            "channels": [{ "name": "log", "type": "log" }],
            "rules": [{
                "name": "any",
                "severity": "error",
                "message_template": "{{service}}",
                "channels": ["log"]
            }]
        }),
        &ProbeRegistry::new(),
    );
    let monitor = Monitor::start(config).unwrap();

    let sender = monitor.event_sender();
    for i in 0..20 {
        let event = HealthEvent::signal(
            format!("svc-{i}"),
            "health",
            HealthStatus::Unhealthy,
            Severity::Error,
            BTreeMap::new(),
        );
        sender.send(event).await.unwrap();
    }

    monitor.shutdown().await.unwrap();

    let stats = monitor.stats().await.unwrap();
    assert_eq!(stats.engine.events, 20);
    assert_eq!(stats.router.delivered, 20);
    assert!(sender.send(crate::helpers::down("late")).await.is_err());
}

#[tokio::test]
async fn test_check_now_through_monitor() {
    let probe = Switch::new(false);
    let mut registry = ProbeRegistry::new();
    registry.register("switch", probe.clone());
    let config = resolve(
        json!({
            "services": [{
                "name": "api",
                "type": "custom",
                "custom_check": "switch",
                "endpoint": "internal://api",
                "interval": 3600
            }]
        }),
        &registry,
    );
    let monitor = Monitor::start(config).unwrap();

    let event = monitor.check_now("api").await.unwrap();
    assert_eq!(event.status, HealthStatus::Healthy);

    assert_eq!(probe.calls(), 2);

    // both cycles reach the history through the alert actor
    let storage = monitor.storage().clone();
    let recorded = tokio::time::timeout(Duration::from_secs(5), async {
        while storage.history("api", 10).await.unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(recorded.is_ok());
    assert!(eventually(Duration::from_secs(1), || monitor.services().len() == 1).await);

    monitor.shutdown().await.unwrap();
}
