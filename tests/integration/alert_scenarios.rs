//! Alert engine scenarios driven through a parsed configuration

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use health_sentinel::{
    actors::alert::AlertHandle,
    alerts::{AlertState, DispatchKind, Outcome, suppression::SuppressionReason},
    config::EngineConfig,
    model::{HealthCheckResult, HealthEvent, HealthStatus, Severity},
    probes::{ProbeKind, ProbeRegistry},
    storage::{MemoryBackend, StorageBackend},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::helpers::{down, engine, eventually, resolve, up};

/// 2024-05-01 12:00:00 UTC plus `secs`
fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn config(extra: Value) -> Value {
    let mut config = json!({
        "channels": [
            { "name": "ops", "type": "log" },
            { "name": "pager", "type": "log", "severity_filter": "critical", "send_resolved": false }
        ],
        "rules": [
            {
                "name": "service-down",
                "condition": { "statuses": ["unhealthy"] },
                "severity": "error",
                "message_template": "{{service}} is {{status}}",
                "channels": ["ops", "pager"],
                "cooldown": 300
            }
        ]
    });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    config
}

#[tokio::test]
async fn test_cooldown_scenario() {
    let engine = engine(resolve(config(json!({})), &ProbeRegistry::new()));
    let event = down("api");

    let first = engine.evaluate(&event, t(0)).await;
    assert_eq!(first.outcome, Outcome::Dispatched { dispatched: 1, rate_limited: 0 });
    // error alerts never reach the critical-only pager
    assert_eq!(first.dispatches[0].channel, "ops");
    assert_eq!(first.dispatches[0].message, "api is unhealthy");

    let second = engine.evaluate(&event, t(120)).await;
    assert_eq!(second.outcome, Outcome::CooledDown { until: t(300) });
    assert!(second.dispatches.is_empty());

    let third = engine.evaluate(&event, t(301)).await;
    assert_eq!(third.outcome, Outcome::Dispatched { dispatched: 1, rate_limited: 0 });

    let alert = engine.store().get(&event.fingerprint).await.unwrap();
    assert_eq!(alert.first_fired_at, t(0));
    assert_eq!(alert.last_fired_at, t(301));
    assert_eq!(alert.fire_count, 3);
    assert_eq!(engine.stats().cooled_down, 1);
}

#[tokio::test]
async fn test_global_rate_limit_scenario() {
    let config = json!({
        "channels": [{ "name": "ops", "type": "log" }],
        "rules": [{
            "name": "critical",
            "severity": "critical",
            "message_template": "{{service}} down",
            "channels": ["ops"]
        }],
        "rate_limit": { "max": 5, "window_secs": 60 }
    });
    let engine = engine(resolve(config, &ProbeRegistry::new()));

    let mut dispatched = 0;
    for i in 0..6 {
        let event = HealthEvent::signal(
            format!("svc-{i}"),
            "health",
            HealthStatus::Unhealthy,
            Severity::Critical,
            BTreeMap::new(),
        );
        dispatched += engine.evaluate(&event, t(i)).await.dispatches.len();
    }

    assert_eq!(dispatched, 5);
    let stats = engine.stats();
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.dispatched, 5);
    // the dropped one still has its alert on record
    assert_eq!(engine.store().open_count().await, 6);

    // next window admits again
    let late = engine.evaluate(&down("svc-late"), t(61)).await;
    assert_eq!(late.dispatches.len(), 1);
}

#[tokio::test]
async fn test_first_matching_rule_wins() {
    let config = json!({
        "channels": [{ "name": "ops", "type": "log" }],
        "rules": [
            {
                "name": "database-down",
                "condition": { "service": "^db-", "statuses": ["unhealthy"] },
                "severity": "critical",
                "message_template": "database {{service}} is down",
                "channels": ["ops"]
            },
            {
                "name": "anything-down",
                "condition": { "statuses": ["unhealthy"] },
                "severity": "warning",
                "message_template": "{{service}} is down",
                "channels": ["ops"]
            }
        ]
    });
    let engine = engine(resolve(config, &ProbeRegistry::new()));

    let db = engine.evaluate(&down("db-main"), t(0)).await;
    assert_eq!(db.dispatches[0].rule, "database-down");
    assert_eq!(db.dispatches[0].severity, Severity::Critical);

    let web = engine.evaluate(&down("web"), t(0)).await;
    assert_eq!(web.dispatches[0].rule, "anything-down");
    assert_eq!(web.dispatches[0].title, "[WARNING] anything-down: web");

    let degraded = HealthEvent::signal("web", "latency", HealthStatus::Degraded, Severity::Warning, BTreeMap::new());
    assert_eq!(engine.evaluate(&degraded, t(0)).await.outcome, Outcome::Unmatched);
}

#[tokio::test]
async fn test_tag_suppression_precedes_cooldown() {
    let config = config(json!({ "suppression": { "tags": { "maintenance": "true" } } }));
    let engine = engine(resolve(config, &ProbeRegistry::new()));

    let muted = down("api").with_tag("maintenance", "true");
    let outcome = engine.evaluate(&muted, t(0)).await.outcome;
    assert_eq!(
        outcome,
        Outcome::Suppressed {
            reason: SuppressionReason::Tag("maintenance=true".to_string())
        }
    );
    let alert = engine.store().get(&muted.fingerprint).await.unwrap();
    assert_eq!(alert.state, AlertState::Suppressed);

    // maintenance over, same fingerprint: no cooldown was started while suppressed
    let live = engine.evaluate(&down("api"), t(10)).await;
    assert_eq!(live.dispatches.len(), 1);
    let alert = engine.store().get(&muted.fingerprint).await.unwrap();
    assert_eq!(alert.state, AlertState::Active);
    assert_eq!(alert.first_fired_at, t(0));
}

#[tokio::test]
async fn test_quiet_hours_and_severity_floor() {
    let config = config(json!({
        "suppression": {
            "quiet_hours": [{ "start": "22:00", "end": "06:00" }],
            "severity_floor": "warning"
        }
    }));
    let engine = engine(resolve(config, &ProbeRegistry::new()));

    let night = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
    assert_matches!(
        engine.evaluate(&down("api"), night).await.outcome,
        Outcome::Suppressed {
            reason: SuppressionReason::QuietHours
        }
    );

    let morning = Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap();
    assert_eq!(engine.evaluate(&down("api"), morning).await.dispatches.len(), 1);
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let engine = engine(resolve(config(json!({})), &ProbeRegistry::new()));

    engine.evaluate(&down("api"), t(0)).await;

    let resolved = engine.evaluate(&up("api"), t(30)).await;
    assert_eq!(resolved.dispatches.len(), 1);
    assert_eq!(resolved.dispatches[0].kind, DispatchKind::Resolved);
    assert_eq!(resolved.dispatches[0].title, "[RESOLVED] service-down: api");
    assert_eq!(resolved.dispatches[0].message, "api recovered (service-down)");

    let again = engine.evaluate(&up("api"), t(40)).await;
    assert_eq!(again.outcome, Outcome::NothingToResolve);
    assert!(again.dispatches.is_empty());

    let alert = engine.store().get(&down("api").fingerprint).await.unwrap();
    assert_eq!(alert.state, AlertState::Resolved);
    assert_eq!(alert.resolved_at, Some(t(30)));
    assert_eq!(engine.stats().resolved, 1);
}

fn result(service: &str, status: HealthStatus) -> HealthCheckResult {
    HealthCheckResult {
        service: service.to_string(),
        kind: ProbeKind::Tcp,
        status,
        latency: Duration::from_millis(12),
        timestamp: Utc::now(),
        error: (status == HealthStatus::Unhealthy).then(|| "connection refused".to_string()),
        metadata: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_alert_actor_records_and_dispatches() {
    let engine = Arc::new(engine(resolve(config(json!({})), &ProbeRegistry::new())));
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let (event_tx, event_rx) = mpsc::channel(16);
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(16);

    let alerts = AlertHandle::spawn(engine, storage.clone(), event_rx, dispatch_tx, EngineConfig::default());

    let failing = HealthEvent::from_result(result("cache", HealthStatus::Unhealthy), 3, BTreeMap::new());
    event_tx.send(failing.clone()).await.unwrap();

    let dispatch = dispatch_rx.recv().await.unwrap();
    assert_eq!(dispatch.service, "cache");
    assert_eq!(dispatch.kind, DispatchKind::Firing);
    assert_eq!(dispatch.fingerprint, failing.fingerprint);

    let recovered = HealthEvent::from_result(result("cache", HealthStatus::Healthy), 1, BTreeMap::new());
    event_tx.send(recovered).await.unwrap();
    let resolution = dispatch_rx.recv().await.unwrap();
    assert_eq!(resolution.kind, DispatchKind::Resolved);

    let history = storage.history("cache", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, HealthStatus::Healthy);

    let records = alerts.alerts().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, AlertState::Resolved);

    alerts.shutdown().await.unwrap();
    // the actor dropped its dispatch sender
    assert!(dispatch_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_mute_suppresses_until_unmuted() {
    let engine = Arc::new(engine(resolve(config(json!({})), &ProbeRegistry::new())));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(16);
    let alerts = AlertHandle::spawn(
        engine.clone(),
        Arc::new(MemoryBackend::new()),
        event_rx,
        dispatch_tx,
        EngineConfig::default(),
    );

    alerts.mute(Duration::from_secs(3600)).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || alerts.is_muted()).await);

    event_tx.send(down("api")).await.unwrap();
    assert!(eventually(Duration::from_secs(2), || alerts.stats().suppressed == 1).await);
    assert!(dispatch_rx.try_recv().is_err());

    alerts.unmute().await.unwrap();
    assert!(eventually(Duration::from_secs(2), || !alerts.is_muted()).await);

    event_tx.send(down("api")).await.unwrap();
    let dispatch = dispatch_rx.recv().await.unwrap();
    assert_eq!(dispatch.kind, DispatchKind::Firing);

    alerts.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ttl_expiry_resolves_silent_alerts() {
    let engine = Arc::new(engine(resolve(config(json!({})), &ProbeRegistry::new())));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(16);
    let settings = EngineConfig {
        alert_ttl_secs: Some(1),
        sweep_interval_secs: 1,
        ..EngineConfig::default()
    };
    let alerts = AlertHandle::spawn(engine, Arc::new(MemoryBackend::new()), event_rx, dispatch_tx, settings);

    event_tx.send(down("api")).await.unwrap();
    assert_eq!(dispatch_rx.recv().await.unwrap().kind, DispatchKind::Firing);

    let resolution = tokio::time::timeout(Duration::from_secs(5), dispatch_rx.recv())
        .await
        .expect("alert should expire")
        .unwrap();
    assert_eq!(resolution.kind, DispatchKind::Resolved);

    let records = alerts.alerts().await;
    assert_eq!(records[0].state, AlertState::Resolved);

    alerts.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_prunes_resolved_alerts_without_ttl() {
    let mut settings = config(json!({}));
    settings["rules"][0]["cooldown"] = json!(0);
    let engine = Arc::new(engine(resolve(settings, &ProbeRegistry::new())));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (dispatch_tx, mut dispatch_rx) = mpsc::channel(16);
    let alerts = AlertHandle::spawn(
        engine.clone(),
        Arc::new(MemoryBackend::new()),
        event_rx,
        dispatch_tx,
        EngineConfig {
            sweep_interval_secs: 1,
            ..EngineConfig::default()
        },
    );

    event_tx.send(down("api")).await.unwrap();
    assert_eq!(dispatch_rx.recv().await.unwrap().kind, DispatchKind::Firing);
    event_tx.send(up("api")).await.unwrap();
    assert_eq!(dispatch_rx.recv().await.unwrap().kind, DispatchKind::Resolved);

    let pruned = tokio::time::timeout(Duration::from_secs(5), async {
        while engine.store().len().await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(pruned.is_ok());
    assert!(alerts.alerts().await.is_empty());

    alerts.shutdown().await.unwrap();
}
