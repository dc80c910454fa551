//! Standalone regression tests.
//!
//! Drives the full router over an in-process monitor: registers services,
//! watches them go down and recover, and checks incidents, alerts, metrics,
//! and persistence across a restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use serde_json::{Value, json};
use tower::ServiceExt;

use pulsewatch_api::build_router;
use pulsewatch_engine::{Engine, MonitorService};
use pulsewatch_health::{BoxFuture, Probe, ProbeOutcome};
use pulsewatch_state::{MonitorConfig, StateStore};

/// Probe answering with whatever status the test currently sets.
struct SwitchProbe {
    status: Arc<AtomicU16>,
}

impl Probe for SwitchProbe {
    fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, ProbeOutcome> {
        let status = self.status.load(Ordering::SeqCst);
        Box::pin(async move {
            ProbeOutcome::from_status(status, Duration::from_millis(4), Utc::now())
        })
    }
}

fn config(interval: Duration) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.probe.interval = interval;
    config.probe.timeout = Duration::from_millis(500);
    config
}

fn setup(store: StateStore, interval: Duration) -> (Router, Arc<MonitorService>, Arc<AtomicU16>) {
    let status = Arc::new(AtomicU16::new(200));
    let engine = Engine::new(store, config(interval)).unwrap();
    let probe = Arc::new(SwitchProbe {
        status: status.clone(),
    });
    let monitor = Arc::new(MonitorService::new(Arc::new(engine), probe));
    (build_router(monitor.clone()), monitor, status)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    // Non-JSON bodies (Prometheus text) come back as a string value.
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, "GET", uri, None).await
}

/// Poll `uri` until `pred` holds or five seconds pass.
async fn wait_for(router: &Router, uri: &str, pred: impl Fn(&Value) -> bool) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let (status, body) = get(router, uri).await;
        assert_eq!(status, StatusCode::OK, "GET {uri}");
        if pred(&body) {
            return body;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting on {uri}: {body}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn standalone_health_endpoint() {
    let (router, _, _) = setup(StateStore::open_in_memory().unwrap(), Duration::from_secs(60));
    let (status, body) = get(&router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn standalone_create_list_and_get_service() {
    let (router, monitor, _) =
        setup(StateStore::open_in_memory().unwrap(), Duration::from_secs(60));

    let (status, body) = get(&router, "/api/services").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, created) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "web", "url": "https://web.example/health"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_u64().unwrap();

    let (_, list) = get(&router, "/api/services").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    // The first probe runs immediately after creation.
    let svc = wait_for(&router, &format!("/api/services/{id}"), |s| s["total_checks"] == 1).await;
    assert_eq!(svc["status"], "healthy");

    monitor.shutdown().await;
}

#[tokio::test]
async fn standalone_rejects_invalid_requests() {
    let (router, _, _) = setup(StateStore::open_in_memory().unwrap(), Duration::from_secs(60));

    let (status, body) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "web", "url": "ftp://files.example"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(&router, "POST", "/api/services", Some(json!({"name": "web"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(&router, "/api/services/77").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&router, "/api/services/77/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, "POST", "/api/incidents/5/resolve", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn standalone_outage_and_recovery() {
    let (router, monitor, status) =
        setup(StateStore::open_in_memory().unwrap(), Duration::from_millis(15));
    status.store(503, Ordering::SeqCst);

    let (_, created) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "api", "url": "https://api.example"})),
    )
    .await;
    let id = created["id"].as_u64().unwrap();

    wait_for(&router, &format!("/api/services/{id}"), |s| s["status"] == "down").await;

    let incidents = wait_for(&router, "/api/incidents", |v| !v.as_array().unwrap().is_empty()).await;
    let incidents = incidents.as_array().unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["status"], "open");
    assert_eq!(incidents[0]["severity"], "high");
    assert_eq!(incidents[0]["title"], "Service api is down");

    let (_, alerts) = get(&router, "/api/alerts?active=true").await;
    let kinds: Vec<&str> = alerts
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["type"].as_str())
        .collect();
    assert_eq!(kinds.iter().filter(|k| **k == "service_down").count(), 1);

    let (_, stats) = get(&router, "/api/dashboard/stats").await;
    assert_eq!(stats["down_services"], 1);
    assert_eq!(stats["open_incidents"], 1);

    status.store(200, Ordering::SeqCst);

    wait_for(&router, "/api/incidents", |v| v[0]["status"] == "resolved").await;
    let (_, svc) = get(&router, &format!("/api/services/{id}")).await;
    assert_eq!(svc["status"], "healthy");

    let (_, alerts) = get(&router, "/api/alerts?active=true").await;
    assert!(
        alerts
            .as_array()
            .unwrap()
            .iter()
            .all(|a| a["type"] != "service_down")
    );

    // Still a single incident for the whole outage.
    let (_, incidents) = get(&router, "/api/incidents").await;
    assert_eq!(incidents.as_array().unwrap().len(), 1);

    monitor.shutdown().await;
}

#[tokio::test]
async fn standalone_metrics_summary_and_prometheus() {
    let (router, monitor, _) =
        setup(StateStore::open_in_memory().unwrap(), Duration::from_millis(15));

    let (_, created) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "web", "url": "https://web.example"})),
    )
    .await;
    let id = created["id"].as_u64().unwrap();

    wait_for(&router, &format!("/api/services/{id}/metrics?range=1h"), |v| {
        v.as_array().unwrap().len() >= 3
    })
    .await;

    let (status, summary) = get(&router, &format!("/api/services/{id}/metrics/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(summary["samples"].as_u64().unwrap() >= 3);
    assert_eq!(summary["error_rate"], 0.0);

    let (status, _) = get(&router, &format!("/api/services/{id}/metrics?range=soon")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, text) = get(&router, "/api/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = text.as_str().unwrap();
    assert!(text.contains("pulsewatch_service_healthy"));
    assert!(text.contains("service=\"web\""));

    monitor.shutdown().await;
}

#[tokio::test]
async fn standalone_manual_incident_lifecycle() {
    let (router, _, _) = setup(StateStore::open_in_memory().unwrap(), Duration::from_secs(60));

    let (_, created) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "db", "url": "https://db.example"})),
    )
    .await;
    let service_id = created["id"].as_u64().unwrap();

    let (status, incident) = send(
        &router,
        "POST",
        "/api/incidents",
        Some(json!({"service_id": service_id, "title": "Slow queries"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(incident["severity"], "medium");
    let id = incident["id"].as_u64().unwrap();

    let (status, _) = send(
        &router,
        "POST",
        "/api/incidents",
        Some(json!({"service_id": service_id, "title": "Again"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, acked) = send(&router, "POST", &format!("/api/incidents/{id}/acknowledge"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "investigating");

    let (status, resolved) = send(&router, "POST", &format!("/api/incidents/{id}/resolve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (status, body) = send(&router, "POST", &format!("/api/incidents/{id}/resolve"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["incident"]["resolved_at"], resolved["resolved_at"]);
}

#[tokio::test]
async fn standalone_delete_service() {
    let (router, monitor, _) =
        setup(StateStore::open_in_memory().unwrap(), Duration::from_secs(60));

    let (_, created) = send(
        &router,
        "POST",
        "/api/services",
        Some(json!({"name": "old", "url": "https://old.example"})),
    )
    .await;
    let id = created["id"].as_u64().unwrap();

    let (status, removed) = send(&router, "DELETE", &format!("/api/services/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["active"], false);
    assert!(monitor.active_monitors().await.is_empty());

    let (_, list) = get(&router, "/api/services").await;
    assert_eq!(list, json!([]));

    let (status, _) = send(&router, "DELETE", &format!("/api/services/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn standalone_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("pulsewatch.redb");

    let id = {
        let (router, monitor, _) =
            setup(StateStore::open(&db_path).unwrap(), Duration::from_secs(60));
        let (_, created) = send(
            &router,
            "POST",
            "/api/services",
            Some(json!({"name": "web", "url": "https://web.example"})),
        )
        .await;
        let id = created["id"].as_u64().unwrap();
        wait_for(&router, &format!("/api/services/{id}"), |s| s["total_checks"] == 1).await;
        monitor.shutdown().await;
        id
    };

    let (router, monitor, _) = setup(StateStore::open(&db_path).unwrap(), Duration::from_secs(60));
    let (status, svc) = get(&router, &format!("/api/services/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(svc["name"], "web");
    assert_eq!(svc["status"], "healthy");
    assert_eq!(svc["total_checks"], 1);
    assert_eq!(monitor.start().await.unwrap(), 1);
    monitor.shutdown().await;
}
