//! pulsewatch-api: REST API for pulsewatch.
//!
//! Provides axum route handlers for managing monitored services and
//! reading their metrics, incidents, alerts, and dashboard stats.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/health` | Liveness of the monitor |
//! | GET | `/api/services` | List active services |
//! | POST | `/api/services` | Register a service |
//! | GET | `/api/services/{id}` | Get a service |
//! | DELETE | `/api/services/{id}` | Remove a service |
//! | GET | `/api/services/{id}/metrics?range=` | Probe samples in range |
//! | GET | `/api/services/{id}/metrics/summary?range=` | Aggregate over range |
//! | GET | `/api/incidents` | List incidents |
//! | POST | `/api/incidents` | Open an incident |
//! | GET | `/api/incidents/{id}` | Get an incident |
//! | POST | `/api/incidents/{id}/acknowledge` | Start investigating |
//! | POST | `/api/incidents/{id}/resolve` | Resolve an incident |
//! | GET | `/api/alerts?active=` | List alerts |
//! | GET | `/api/dashboard/stats` | Dashboard snapshot |
//! | GET | `/api/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pulsewatch_engine::MonitorService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub monitor: Arc<MonitorService>,
}

/// Build the complete API router.
pub fn build_router(monitor: Arc<MonitorService>) -> Router {
    let api_state = ApiState { monitor };

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/services", get(handlers::list_services).post(handlers::create_service))
        .route("/services/{id}", get(handlers::get_service).delete(handlers::delete_service))
        .route("/services/{id}/metrics", get(handlers::service_metrics))
        .route("/services/{id}/metrics/summary", get(handlers::metrics_summary))
        .route("/incidents", get(handlers::list_incidents).post(handlers::create_incident))
        .route("/incidents/{id}", get(handlers::get_incident))
        .route("/incidents/{id}/acknowledge", post(handlers::acknowledge_incident))
        .route("/incidents/{id}/resolve", post(handlers::resolve_incident))
        .route("/alerts", get(handlers::list_alerts))
        .route("/dashboard/stats", get(handlers::dashboard_stats))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(api_state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
