//! Integration tests for the snapshot API
//!
//! Every test starts a real monitor plus API server on a random port and talks
//! to it over HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use health_sentinel::{
    api::{ApiConfig, ApiState, spawn_api_server},
    monitor::Monitor,
    probes::ProbeRegistry,
};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::{Switch, resolve};

const TOKEN: &str = "test-token";

async fn spawn_test_api(down: bool) -> (Monitor, SocketAddr) {
    let mut registry = ProbeRegistry::new();
    registry.register("switch", Switch::new(down));
    let config = resolve(
        json!({
            "services": [
                { "name": "api", "type": "custom", "custom_check": "switch", "endpoint": "internal://api", "interval": 3600, "retries": 0 },
                { "name": "idle", "type": "custom", "custom_check": "switch", "endpoint": "internal://idle", "interval": 3600, "retries": 0 }
            ],
            "scheduler": { "stagger_secs": 3600 },
            "channels": [{ "name": "log", "type": "log" }],
            "rules": [{
                "name": "down",
                "condition": { "statuses": ["unhealthy"] },
                "severity": "error",
                "message_template": "{{service}} is down",
                "channels": ["log"]
            }]
        }),
        &registry,
    );
    let monitor = Monitor::start(config).unwrap();

    let api = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: Some(TOKEN.to_string()),
        enable_cors: true,
    };
    let addr = spawn_api_server(api, ApiState::new(monitor.clone())).await.unwrap();
    (monitor, addr)
}

async fn get(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap_or(Value::Null))
}

/// Wait until the first (immediate) probe of "api" reached the history
async fn wait_for_first_result(addr: SocketAddr) {
    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, body) = get(addr, "/api/v1/services/api/history").await;
            if body["count"].as_u64().unwrap_or(0) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "first probe never recorded");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (monitor, addr) = spawn_test_api(false).await;

    let (status, body) = get(addr, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_healthy"], true);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_services_report_latest_status() {
    let (monitor, addr) = spawn_test_api(false).await;
    wait_for_first_result(addr).await;

    let (status, body) = get(addr, "/api/v1/services").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let services = body["services"].as_array().unwrap();
    assert_eq!(services[0]["name"], "api");
    assert_eq!(services[0]["status"], "healthy");
    assert_eq!(services[0]["interval_secs"], 3600);
    // staggered half an hour out, never probed yet
    assert_eq!(services[1]["name"], "idle");
    assert_eq!(services[1]["status"], "unknown");
    assert_eq!(services[1]["last_check"], Value::Null);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_history_and_uptime() {
    let (monitor, addr) = spawn_test_api(false).await;
    wait_for_first_result(addr).await;

    let (status, body) = get(addr, "/api/v1/services/api/history?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "api");
    assert_eq!(body["results"][0]["status"], "healthy");

    let (status, body) = get(addr, "/api/v1/services/api/uptime").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uptime_percentage"], 100.0);

    let (status, body) = get(addr, "/api/v1/services/nope/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "unknown service 'nope'");

    let (status, _) = get(addr, "/api/v1/services/api/history?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_alerts_listing_and_filter() {
    let (monitor, addr) = spawn_test_api(true).await;

    let ready = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, body) = get(addr, "/api/v1/alerts").await;
            if body["count"].as_u64().unwrap_or(0) > 0 {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("alert should open");
    assert_eq!(ready["alerts"][0]["service"], "api");
    assert_eq!(ready["alerts"][0]["state"], "active");
    assert_eq!(ready["muted"], false);

    let (_, open) = get(addr, "/api/v1/alerts?state=open").await;
    assert_eq!(open["count"], 1);
    let (_, resolved) = get(addr, "/api/v1/alerts?state=resolved").await;
    assert_eq!(resolved["count"], 0);
    let (status, _) = get(addr, "/api/v1/alerts?state=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = get(addr, "/api/v1/stats").await;
    assert_eq!(stats["services"], 2);
    assert_eq!(stats["open_alerts"], 1);
    assert_eq!(stats["engine"]["dispatched"], 1);
    assert_eq!(stats["storage"]["backend"], "memory");

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_operator_actions_require_token() {
    let (monitor, addr) = spawn_test_api(false).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/services/api/check");

    let response = client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client.post(&url).bearer_auth("wrong").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client.post(&url).bearer_auth(TOKEN).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let event: Value = response.json().await.unwrap();
    assert_eq!(event["service"], "api");
    assert_eq!(event["status"], "healthy");

    let response = client
        .post(format!("http://{addr}/api/v1/alerts/mute"))
        .bearer_auth(TOKEN)
        .json(&json!({ "duration_secs": 600 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(crate::helpers::eventually(Duration::from_secs(2), || monitor.is_muted()).await);

    let response = client
        .delete(format!("http://{addr}/api/v1/alerts/mute"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(crate::helpers::eventually(Duration::from_secs(2), || !monitor.is_muted()).await);

    monitor.shutdown().await.unwrap();
}
