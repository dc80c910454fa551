//! Threshold alert rules.
//!
//! Every classification re-evaluates the four rules for its service. Each
//! rule yields fire, clear, or hold; firing is a no-op while an unresolved
//! alert of the same kind exists for the service.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use pulsewatch_health::{Classification, ProbeOutcome};
use pulsewatch_state::{
    Alert, AlertKind, AlertThresholds, RetryPolicy, Service, ServiceId, ServiceStatus, StateStore,
    retry_transient,
};

use crate::error::EngineResult;

/// Per-service anti-flap counters for the response-time rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertRuleState {
    /// Consecutive non-error probes above the response-time threshold.
    pub slow_streak: u32,
    /// Consecutive non-error probes at or below it.
    pub fast_streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleAction {
    Fire,
    Clear,
    Hold,
}

/// What one evaluation did to a service's alerts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertChanges {
    pub fired: Vec<Alert>,
    pub resolved: Vec<Alert>,
}

/// Evaluates alert rules and maintains alert records.
pub struct AlertEngine {
    store: StateStore,
    retry: RetryPolicy,
    thresholds: AlertThresholds,
    down_after: u32,
}

impl AlertEngine {
    pub fn new(
        store: StateStore,
        retry: RetryPolicy,
        thresholds: AlertThresholds,
        down_after_consecutive_errors: u32,
    ) -> Self {
        Self {
            store,
            retry,
            thresholds,
            down_after: down_after_consecutive_errors,
        }
    }

    /// All alerts, newest first; only unresolved ones when `active_only`.
    pub fn list(&self, active_only: bool) -> EngineResult<Vec<Alert>> {
        let mut alerts = retry_transient(&self.retry, "list alerts", || self.store.list_alerts())?;
        if active_only {
            alerts.retain(Alert::is_active);
        }
        alerts.sort_by(|a, b| {
            b.triggered_at
                .cmp(&a.triggered_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(alerts)
    }

    /// Re-evaluate every rule for `service` after a classification.
    pub fn evaluate(
        &self,
        service: &Service,
        classification: &Classification,
        outcome: &ProbeOutcome,
        rules: &mut AlertRuleState,
    ) -> EngineResult<AlertChanges> {
        let t = &self.thresholds;
        let now = outcome.checked_at;

        let service_down = if classification.entered(ServiceStatus::Down) {
            RuleAction::Fire
        } else if classification.left(ServiceStatus::Down) {
            RuleAction::Clear
        } else {
            RuleAction::Hold
        };

        let response_time = response_time_action(
            rules,
            outcome,
            t.response_time_secs,
            t.response_time_consecutive,
        );

        let error_rate = hysteresis_action(
            classification.window_error_rate,
            t.error_rate,
            t.error_rate_hysteresis,
        );

        let low_uptime = uptime_action(classification.uptime, t.uptime_percent);

        let mut active: Vec<Alert> = retry_transient(&self.retry, "service alerts", || {
            self.store.alerts_for_service(service.id)
        })?;
        active.retain(Alert::is_active);

        let mut changes = AlertChanges::default();
        let decisions = [
            (AlertKind::ServiceDown, service_down),
            (AlertKind::HighResponseTime, response_time),
            (AlertKind::HighErrorRate, error_rate),
            (AlertKind::LowUptime, low_uptime),
        ];
        for (kind, action) in decisions {
            let mut current: Vec<Alert> = active.iter().filter(|a| a.kind == kind).cloned().collect();
            match action {
                RuleAction::Fire if current.is_empty() => {
                    let (message, threshold) = self.describe(kind, service, classification);
                    let alert = self.insert(service.id, kind, message, threshold, now)?;
                    changes.fired.push(alert);
                }
                RuleAction::Fire => {
                    debug_assert_eq!(current.len(), 1, "duplicate active {kind} alerts for service {}", service.id);
                    // Keep the oldest active alert.
                    for extra in current.split_off(1) {
                        error!(service_id = service.id, alert_id = extra.id, %kind, "duplicate active alert, resolving");
                        changes.resolved.push(self.mark_resolved(extra, now)?);
                    }
                }
                RuleAction::Clear => {
                    for alert in current {
                        changes.resolved.push(self.mark_resolved(alert, now)?);
                    }
                }
                RuleAction::Hold => {}
            }
        }
        Ok(changes)
    }

    /// Resolve every unresolved alert of a service.
    pub fn resolve_all_for_service(
        &self,
        service_id: ServiceId,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<Alert>> {
        let alerts = retry_transient(&self.retry, "service alerts", || {
            self.store.alerts_for_service(service_id)
        })?;
        let mut resolved = Vec::new();
        for alert in alerts.into_iter().filter(Alert::is_active) {
            resolved.push(self.mark_resolved(alert, now)?);
        }
        Ok(resolved)
    }

    fn describe(
        &self,
        kind: AlertKind,
        service: &Service,
        classification: &Classification,
    ) -> (String, f64) {
        let t = &self.thresholds;
        match kind {
            AlertKind::ServiceDown => (
                format!(
                    "Service {} is down after {} consecutive failed checks",
                    service.name, self.down_after
                ),
                f64::from(self.down_after),
            ),
            AlertKind::HighResponseTime => (
                format!(
                    "High response time on {}: {:.3}s (threshold {}s)",
                    service.name, classification.response_time, t.response_time_secs
                ),
                t.response_time_secs,
            ),
            AlertKind::HighErrorRate => (
                format!(
                    "High error rate on {}: {:.1}% (threshold {:.1}%)",
                    service.name,
                    classification.window_error_rate * 100.0,
                    t.error_rate * 100.0
                ),
                t.error_rate,
            ),
            AlertKind::LowUptime => (
                format!(
                    "Low uptime on {}: {:.2}% (threshold {}%)",
                    service.name, classification.uptime, t.uptime_percent
                ),
                t.uptime_percent,
            ),
        }
    }

    fn insert(
        &self,
        service_id: ServiceId,
        kind: AlertKind,
        message: String,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> EngineResult<Alert> {
        let alert = retry_transient(&self.retry, "insert alert", || {
            self.store.insert_alert(|id| Alert {
                id,
                service_id,
                kind,
                message: message.clone(),
                threshold,
                triggered_at: now,
                resolved_at: None,
            })
        })?;
        warn!(alert_id = alert.id, service_id, %kind, message = %alert.message, "alert fired");
        Ok(alert)
    }

    fn mark_resolved(&self, mut alert: Alert, now: DateTime<Utc>) -> EngineResult<Alert> {
        alert.resolved_at = Some(now);
        retry_transient(&self.retry, "resolve alert", || self.store.put_alert(&alert))?;
        info!(alert_id = alert.id, service_id = alert.service_id, kind = %alert.kind, "alert resolved");
        Ok(alert)
    }
}

/// K consecutive slow probes fire, K consecutive fast probes clear.
/// Error probes leave both streaks untouched.
fn response_time_action(
    rules: &mut AlertRuleState,
    outcome: &ProbeOutcome,
    threshold: f64,
    consecutive: u32,
) -> RuleAction {
    if outcome.error {
        return RuleAction::Hold;
    }
    if outcome.response_time > threshold {
        rules.slow_streak = rules.slow_streak.saturating_add(1);
        rules.fast_streak = 0;
    } else {
        rules.fast_streak = rules.fast_streak.saturating_add(1);
        rules.slow_streak = 0;
    }
    let k = consecutive.max(1);
    if rules.slow_streak >= k {
        RuleAction::Fire
    } else if rules.fast_streak >= k {
        RuleAction::Clear
    } else {
        RuleAction::Hold
    }
}

/// Fire above `threshold`, clear only at or below `threshold - hysteresis`.
fn hysteresis_action(value: f64, threshold: f64, hysteresis: f64) -> RuleAction {
    let clear_threshold = (threshold - hysteresis).max(0.0);
    if value > threshold {
        RuleAction::Fire
    } else if value <= clear_threshold {
        RuleAction::Clear
    } else {
        RuleAction::Hold
    }
}

/// Fire below `threshold`, clear only once uptime is back above it.
fn uptime_action(uptime: f64, threshold: f64) -> RuleAction {
    if uptime < threshold {
        RuleAction::Fire
    } else if uptime > threshold {
        RuleAction::Clear
    } else {
        RuleAction::Hold
    }
}
