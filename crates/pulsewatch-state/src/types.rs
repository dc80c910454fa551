//! Domain types for the pulsewatch state store.
//!
//! These types represent monitored services, the probe metrics recorded
//! for them, and the incidents and alerts derived from those metrics. All
//! types serialize to/from JSON, both for redb storage and for the API.
//! Timestamps are UTC and serialize as RFC 3339 / ISO-8601 strings.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tables::composite_key;

/// Unique identifier for a monitored service.
pub type ServiceId = u64;

/// Unique identifier for an incident.
pub type IncidentId = u64;

/// Unique identifier for an alert.
pub type AlertId = u64;

/// Compute all-time uptime in percent, or `None` before the first check.
pub fn uptime_percent(total_checks: u64, error_count: u64) -> Option<f64> {
    if total_checks == 0 {
        return None;
    }
    let ok = total_checks.saturating_sub(error_count);
    Some(100.0 * ok as f64 / total_checks as f64)
}

// ── Service ───────────────────────────────────────────────────────

/// Derived health classification of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Down,
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Down => "down",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored HTTP endpoint and its current derived health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub url: String,
    pub status: ServiceStatus,
    /// When the latest probe completed.
    pub last_check: Option<DateTime<Utc>>,
    /// Latest probe duration in seconds.
    pub response_time: f64,
    /// All-time uptime in percent; `None` until the first check.
    pub uptime: Option<f64>,
    pub error_count: u64,
    pub total_checks: u64,
    /// Errors since the last successful probe.
    #[serde(default)]
    pub consecutive_errors: u32,
    /// False once the service has been removed (soft delete).
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Service {
    /// A freshly registered service: unknown status, zero counters.
    pub fn new(id: ServiceId, name: &str, url: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.to_string(),
            url: url.to_string(),
            status: ServiceStatus::Unknown,
            last_check: None,
            response_time: 0.0,
            uptime: None,
            error_count: 0,
            total_checks: 0,
            consecutive_errors: 0,
            active: true,
            created_at: now,
            removed_at: None,
        }
    }

    /// Uptime as derived from the counters.
    pub fn computed_uptime(&self) -> Option<f64> {
        uptime_percent(self.total_checks, self.error_count)
    }

    pub fn has_checks(&self) -> bool {
        self.total_checks > 0
    }
}

// ── Metric ────────────────────────────────────────────────────────

/// One immutable probe sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub service_id: ServiceId,
    pub timestamp: DateTime<Utc>,
    /// Probe duration in seconds.
    pub response_time: f64,
    /// HTTP status, absent when no response was received.
    pub status_code: Option<u16>,
    pub error: bool,
    /// All-time uptime of the service right after this sample.
    pub uptime: f64,
}

// ── Incident ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Lifecycle state of an incident. `Resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

/// What opened an incident. Only outage incidents close on recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentOrigin {
    #[default]
    Outage,
    Manual,
}

/// A tracked outage episode for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: IncidentId,
    pub service_id: ServiceId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    #[serde(default)]
    pub origin: IncidentOrigin,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Set exactly once, on resolution.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Open or investigating.
    pub fn is_unresolved(&self) -> bool {
        self.status != IncidentStatus::Resolved
    }
}

// ── Alert ─────────────────────────────────────────────────────────

/// Threshold rule that produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ServiceDown,
    HighResponseTime,
    HighErrorRate,
    LowUptime,
}

impl AlertKind {
    pub const ALL: [AlertKind; 4] = [
        AlertKind::ServiceDown,
        AlertKind::HighResponseTime,
        AlertKind::HighErrorRate,
        AlertKind::LowUptime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::ServiceDown => "service_down",
            AlertKind::HighResponseTime => "high_response_time",
            AlertKind::HighErrorRate => "high_error_rate",
            AlertKind::LowUptime => "low_uptime",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold-triggered record. At most one unresolved alert exists
/// per `(service_id, kind)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub service_id: ServiceId,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Build the composite key for the alerts table.
    pub fn table_key(&self) -> String {
        composite_key(self.service_id, self.id)
    }
}

// ── Dashboard ─────────────────────────────────────────────────────

/// Point-in-time summary consumed by the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardStats {
    pub total_services: usize,
    pub healthy_services: usize,
    pub down_services: usize,
    pub open_incidents: usize,
    /// Mean of the latest response time across checked services, seconds.
    pub avg_response_time: f64,
    pub timestamp: DateTime<Utc>,
}
