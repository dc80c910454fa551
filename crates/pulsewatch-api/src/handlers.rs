//! REST API handlers.
//!
//! Each handler calls into the monitor service and returns the entity as
//! JSON. Errors are `{"error": "..."}` with a status code per error kind.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use pulsewatch_engine::{EngineError, NewIncident};
use pulsewatch_metrics::TimeRange;
use pulsewatch_state::{IncidentId, ServiceId, Severity};

use crate::ApiState;

/// Error returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn error_body(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = match self {
            ApiError::BadRequest(msg) => return error_body(StatusCode::BAD_REQUEST, &msg),
            ApiError::Engine(e) => e,
        };
        match e {
            EngineError::Validation(msg) => error_body(StatusCode::BAD_REQUEST, &msg),
            EngineError::NotFound(_) => error_body(StatusCode::NOT_FOUND, &e.to_string()),
            EngineError::InvalidState(msg) => error_body(StatusCode::CONFLICT, &msg),
            EngineError::AlreadyResolved(incident) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": "incident already resolved", "incident": incident })),
            )
                .into_response(),
            EngineError::Unavailable(ref source) => {
                warn!(error = %source, "store unavailable");
                error_body(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
            }
            EngineError::Store(ref source) => {
                error!(error = %source, "store failure");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Health ─────────────────────────────────────────────────────

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Services ───────────────────────────────────────────────────

/// Create-service request body.
#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub url: String,
}

/// GET /api/services
pub async fn list_services(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().list_services()?))
}

/// POST /api/services
pub async fn create_service(
    State(state): State<ApiState>,
    body: Result<Json<CreateServiceRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let service = state.monitor.add_service(&req.name, &req.url).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// GET /api/services/{id}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().get_service(id)?))
}

/// DELETE /api/services/{id}
pub async fn delete_service(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.remove_service(id).await?))
}

// ── Metrics ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub range: Option<String>,
}

impl RangeQuery {
    fn time_range(&self) -> ApiResult<TimeRange> {
        TimeRange::parse(self.range.as_deref(), Utc::now()).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "invalid range {:?}, expected e.g. 30m, 1h, 24h, 7d",
                self.range.as_deref().unwrap_or_default()
            ))
        })
    }
}

/// GET /api/services/{id}/metrics?range=24h
pub async fn service_metrics(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<impl IntoResponse> {
    let range = query.time_range()?;
    Ok(Json(state.monitor.engine().service_metrics(id, &range)?))
}

/// GET /api/services/{id}/metrics/summary?range=24h
pub async fn metrics_summary(
    State(state): State<ApiState>,
    Path(id): Path<ServiceId>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<impl IntoResponse> {
    let range = query.time_range()?;
    Ok(Json(state.monitor.engine().metrics_summary(id, &range)?))
}

// ── Incidents ──────────────────────────────────────────────────

/// Create-incident request body.
#[derive(Debug, Deserialize)]
pub struct CreateIncidentRequest {
    pub service_id: ServiceId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
}

/// GET /api/incidents
pub async fn list_incidents(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().list_incidents()?))
}

/// POST /api/incidents
pub async fn create_incident(
    State(state): State<ApiState>,
    body: Result<Json<CreateIncidentRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let incident = state.monitor.engine().create_incident(NewIncident {
        service_id: req.service_id,
        title: req.title,
        description: req.description,
        severity: req.severity,
    })?;
    Ok((StatusCode::CREATED, Json(incident)))
}

/// GET /api/incidents/{id}
pub async fn get_incident(
    State(state): State<ApiState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().get_incident(id)?))
}

/// POST /api/incidents/{id}/acknowledge
pub async fn acknowledge_incident(
    State(state): State<ApiState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().acknowledge_incident(id)?))
}

/// POST /api/incidents/{id}/resolve
pub async fn resolve_incident(
    State(state): State<ApiState>,
    Path(id): Path<IncidentId>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().resolve_incident(id)?))
}

// ── Alerts ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    #[serde(default)]
    pub active: bool,
}

/// GET /api/alerts?active=true
pub async fn list_alerts(
    State(state): State<ApiState>,
    Query(query): Query<AlertQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().list_alerts(query.active)?))
}

// ── Dashboard ──────────────────────────────────────────────────

/// GET /api/dashboard/stats
pub async fn dashboard_stats(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.monitor.engine().stats()?))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /api/metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    let body = state.monitor.engine().prometheus()?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use pulsewatch_engine::{Engine, MonitorService};
    use pulsewatch_health::{BoxFuture, Probe, ProbeOutcome};
    use pulsewatch_state::{MonitorConfig, StateError, StateStore};
    use serde_json::Value;

    struct UpProbe;

    impl Probe for UpProbe {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(async { ProbeOutcome::from_status(200, Duration::from_millis(3), Utc::now()) })
        }
    }

    fn test_state() -> ApiState {
        let engine = Engine::new(StateStore::open_in_memory().unwrap(), MonitorConfig::default())
            .unwrap();
        ApiState {
            monitor: Arc::new(MonitorService::new(Arc::new(engine), Arc::new(UpProbe))),
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn create_req(name: &str, url: &str) -> Result<Json<CreateServiceRequest>, JsonRejection> {
        Ok(Json(CreateServiceRequest {
            name: name.to_string(),
            url: url.to_string(),
        }))
    }

    #[tokio::test]
    async fn health_reports_version() {
        let resp = health().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn list_services_empty() {
        let resp = list_services(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));
    }

    #[tokio::test]
    async fn create_and_get_service() {
        let state = test_state();
        let resp = create_service(State(state.clone()), create_req("api", "https://api.example/health"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["status"], "unknown");
        let id = created["id"].as_u64().unwrap();

        let resp = get_service(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["name"], "api");
        state.monitor.shutdown().await;
    }

    #[tokio::test]
    async fn create_service_validation_error() {
        let resp = create_service(State(test_state()), create_req("", "nope"))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn get_nonexistent_service() {
        let resp = get_service(State(test_state()), Path(42)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_service_twice() {
        let state = test_state();
        let svc = state.monitor.add_service("api", "https://api.example").await.unwrap();

        let resp = delete_service(State(state.clone()), Path(svc.id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["active"], false);

        let resp = delete_service(State(state.clone()), Path(svc.id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = delete_service(State(state), Path(999)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rejects_bad_range() {
        let state = test_state();
        let svc = state.monitor.engine().create_service("api", "https://api.example").unwrap();
        let query = RangeQuery {
            range: Some("fortnight".into()),
        };
        let resp = service_metrics(State(state.clone()), Path(svc.id), Query(query))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = service_metrics(State(state), Path(svc.id), Query(RangeQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));
    }

    #[tokio::test]
    async fn resolve_twice_reports_already_resolved() {
        let state = test_state();
        let svc = state.monitor.engine().create_service("api", "https://api.example").unwrap();
        let req = CreateIncidentRequest {
            service_id: svc.id,
            title: "Elevated errors".into(),
            description: String::new(),
            severity: Severity::High,
        };
        let resp = create_incident(State(state.clone()), Ok(Json(req))).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = body_json(resp).await["id"].as_u64().unwrap();

        let resp = resolve_incident(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let first = body_json(resp).await;
        assert_eq!(first["status"], "resolved");

        let resp = resolve_incident(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "incident already resolved");
        assert_eq!(body["incident"]["resolved_at"], first["resolved_at"]);

        let resp = resolve_incident(State(state), Path(404)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_failures_map_to_server_errors() {
        let unavailable = ApiError::Engine(EngineError::Unavailable(StateError::Write(
            "disk busy".into(),
        )))
        .into_response();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(unavailable).await;
        assert_eq!(body["error"], "store unavailable: write error: disk busy");

        let broken = ApiError::Engine(EngineError::Store(StateError::Deserialize(
            "bad record".into(),
        )))
        .into_response();
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(broken).await;
        assert_eq!(body["error"], "store error: deserialization error: bad record");
    }

    #[tokio::test]
    async fn dashboard_stats_snapshot() {
        let resp = dashboard_stats(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["total_services"], 0);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
