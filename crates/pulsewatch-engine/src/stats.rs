//! Dashboard statistics, recomputed from scratch on every call.

use chrono::{DateTime, Utc};

use pulsewatch_state::{DashboardStats, Incident, Service, ServiceStatus};

/// Summarize the active services and unresolved incidents.
///
/// Degraded and unknown services count toward the total only, so
/// `healthy + down <= total` always holds.
pub fn dashboard_stats(
    services: &[Service],
    incidents: &[Incident],
    now: DateTime<Utc>,
) -> DashboardStats {
    let active: Vec<&Service> = services.iter().filter(|s| s.active).collect();
    let count = |status| active.iter().filter(|s| s.status == status).count();

    let checked: Vec<f64> = active
        .iter()
        .filter(|s| s.has_checks())
        .map(|s| s.response_time)
        .collect();
    let avg_response_time = if checked.is_empty() {
        0.0
    } else {
        checked.iter().sum::<f64>() / checked.len() as f64
    };

    DashboardStats {
        total_services: active.len(),
        healthy_services: count(ServiceStatus::Healthy),
        down_services: count(ServiceStatus::Down),
        open_incidents: incidents.iter().filter(|i| i.is_unresolved()).count(),
        avg_response_time,
        timestamp: now,
    }
}
