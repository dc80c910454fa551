//! The engine core: per-service state behind one exclusive lock each.
//!
//! Every probe outcome for a service is applied while holding that
//! service's lock: classify, run the incident and alert rules, then persist
//! the service and its metric. Commands that touch a service (removal,
//! incident changes) take the same lock. Listings and stats read the store
//! directly and never hold a service lock across a scan.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use pulsewatch_health::{
    Classification, HealthState, ProbeOutcome, ProbeSink, SinkVerdict, classify,
};
use pulsewatch_metrics::{MetricsAggregate, MetricsStore, TimeRange, render_prometheus};
use pulsewatch_state::{
    Alert, DashboardStats, Incident, IncidentId, Metric, MonitorConfig, Service, ServiceId,
    StateStore,
};

use crate::alerts::{AlertChanges, AlertEngine, AlertRuleState};
use crate::error::{EngineError, EngineResult};
use crate::incidents::{EscalationPolicy, IncidentChanges, IncidentManager, NewIncident};
use crate::registry::Registry;
use crate::stats::dashboard_stats;

/// Mutable per-service state, guarded by the service's lock.
struct ServiceSlot {
    service: Service,
    health: HealthState,
    rules: AlertRuleState,
    healthy_streak: u32,
}

/// Everything one probe changed.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub service: Service,
    pub classification: Classification,
    pub incidents: IncidentChanges,
    pub alerts: AlertChanges,
}

pub struct Engine {
    config: MonitorConfig,
    registry: Registry,
    metrics: MetricsStore,
    incidents: IncidentManager,
    alerts: AlertEngine,
    slots: RwLock<BTreeMap<ServiceId, Arc<Mutex<ServiceSlot>>>>,
}

impl Engine {
    /// Build the engine over `store`, restoring per-service state for
    /// every persisted service.
    pub fn new(store: StateStore, config: MonitorConfig) -> EngineResult<Self> {
        let retry = config.store.clone();
        let registry = Registry::new(store.clone(), retry.clone());
        let metrics = MetricsStore::new(store.clone(), &config.metrics, retry.clone());
        let incidents = IncidentManager::new(store.clone(), retry.clone(), &config.incidents);
        let alerts = AlertEngine::new(
            store,
            retry,
            config.alerts.clone(),
            config.classifier.down_after_consecutive_errors,
        );

        // Enough history to see whether the oldest window entry ended an
        // outage.
        let replay = config.classifier.window_size
            + config.classifier.down_after_consecutive_errors as usize;
        let mut slots = BTreeMap::new();
        for service in registry.list()? {
            let recent = metrics.recent(service.id, replay)?;
            let health = HealthState::restore(&service, &recent, &config.classifier);
            slots.insert(service.id, Arc::new(Mutex::new(ServiceSlot::new(service, health))));
        }
        if !slots.is_empty() {
            info!(services = slots.len(), "restored service state");
        }

        Ok(Self {
            config,
            registry,
            metrics,
            incidents,
            alerts,
            slots: RwLock::new(slots),
        })
    }

    /// Replace the configured escalation policy.
    pub fn with_escalation(mut self, policy: Box<dyn EscalationPolicy>) -> Self {
        self.incidents.set_escalation(policy);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn metrics_store(&self) -> &MetricsStore {
        &self.metrics
    }

    /// The lock of an active service. Removed services have no slot.
    fn slot(&self, id: ServiceId) -> EngineResult<Arc<Mutex<ServiceSlot>>> {
        if let Some(slot) = self.slots.read().get(&id).cloned() {
            return Ok(slot);
        }
        // Unknown ids surface as NotFound from the registry.
        self.registry.get(id)?;
        Err(EngineError::InvalidState(format!("service {id} was removed")))
    }

    // ── Probes ─────────────────────────────────────────────────────

    /// Apply one probe outcome to an active service.
    pub fn apply_probe(&self, id: ServiceId, outcome: &ProbeOutcome) -> EngineResult<ProbeReport> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock();
        if !slot.service.active {
            return Err(EngineError::InvalidState(format!("service {id} was removed")));
        }

        let classification = classify(&slot.health, outcome, &self.config.classifier);
        let counters = &classification.state;

        let mut service = slot.service.clone();
        service.status = classification.status();
        service.last_check = Some(outcome.checked_at);
        service.response_time = outcome.response_time;
        service.total_checks = counters.total_checks;
        service.error_count = counters.error_count;
        service.consecutive_errors = counters.consecutive_errors;
        // Always re-derived from the counters, never carried over.
        service.uptime = service.computed_uptime();

        // Rules run on copies; the slot only advances once every write
        // succeeded, so a failed probe is re-evaluated from the prior state.
        let mut healthy_streak = slot.healthy_streak;
        let mut rules = slot.rules;
        let incidents = self.incidents.on_classification(
            &service,
            &classification,
            outcome,
            &mut healthy_streak,
        )?;
        let alerts = self
            .alerts
            .evaluate(&service, &classification, outcome, &mut rules)?;

        self.registry.put(&service)?;
        self.metrics.record(&Metric {
            service_id: id,
            timestamp: outcome.checked_at,
            response_time: outcome.response_time,
            status_code: outcome.status_code,
            error: outcome.error,
            uptime: classification.uptime,
        })?;

        slot.service = service.clone();
        slot.health = classification.state.clone();
        slot.healthy_streak = healthy_streak;
        slot.rules = rules;

        if classification.changed() {
            info!(
                service_id = id,
                from = %classification.previous,
                to = %service.status,
                "service status changed"
            );
        } else {
            debug!(
                service_id = id,
                status = %service.status,
                response_time = outcome.response_time,
                error = outcome.error,
                "probe applied"
            );
        }

        Ok(ProbeReport {
            service,
            classification,
            incidents,
            alerts,
        })
    }

    // ── Services ───────────────────────────────────────────────────

    pub fn create_service(&self, name: &str, url: &str) -> EngineResult<Service> {
        let service = self.registry.create(name, url, Utc::now())?;
        let slot = ServiceSlot::new(service.clone(), HealthState::default());
        self.slots
            .write()
            .insert(service.id, Arc::new(Mutex::new(slot)));
        Ok(service)
    }

    pub fn get_service(&self, id: ServiceId) -> EngineResult<Service> {
        self.registry.get(id)
    }

    /// Active services, ascending id.
    pub fn list_services(&self) -> EngineResult<Vec<Service>> {
        self.registry.list()
    }

    /// Soft-delete a service and resolve its unresolved alerts. Probes
    /// applied afterwards are rejected.
    pub fn remove_service(&self, id: ServiceId) -> EngineResult<Service> {
        let slot = self.slot(id)?;
        let mut slot = slot.lock();
        let now = Utc::now();
        let service = self.registry.remove(id, now)?;
        slot.service = service.clone();
        self.slots.write().remove(&id);
        let resolved = self.alerts.resolve_all_for_service(id, now)?;
        if !resolved.is_empty() {
            debug!(service_id = id, alerts = resolved.len(), "alerts of removed service resolved");
        }
        Ok(service)
    }

    // ── Incidents ──────────────────────────────────────────────────

    pub fn list_incidents(&self) -> EngineResult<Vec<Incident>> {
        self.incidents.list()
    }

    pub fn get_incident(&self, id: IncidentId) -> EngineResult<Incident> {
        self.incidents.get(id)
    }

    pub fn create_incident(&self, new: NewIncident) -> EngineResult<Incident> {
        let slot = self.slot(new.service_id)?;
        let slot = slot.lock();
        if !slot.service.active {
            return Err(EngineError::InvalidState(format!(
                "service {} was removed",
                new.service_id
            )));
        }
        self.incidents.open_manual(new, Utc::now())
    }

    pub fn acknowledge_incident(&self, id: IncidentId) -> EngineResult<Incident> {
        let incident = self.incidents.get(id)?;
        let slot = self.slot(incident.service_id).ok();
        let _guard = slot.as_ref().map(|s| s.lock());
        self.incidents.acknowledge(id, Utc::now())
    }

    /// Resolve an incident. Repeating the call returns
    /// [`EngineError::AlreadyResolved`] with the unchanged incident.
    pub fn resolve_incident(&self, id: IncidentId) -> EngineResult<Incident> {
        let incident = self.incidents.get(id)?;
        let slot = self.slot(incident.service_id).ok();
        let _guard = slot.as_ref().map(|s| s.lock());
        self.incidents.resolve(id, Utc::now())
    }

    // ── Alerts, metrics, stats ─────────────────────────────────────

    pub fn list_alerts(&self, active_only: bool) -> EngineResult<Vec<Alert>> {
        self.alerts.list(active_only)
    }

    pub fn service_metrics(&self, id: ServiceId, range: &TimeRange) -> EngineResult<Vec<Metric>> {
        self.registry.get(id)?;
        Ok(self.metrics.query(id, range)?)
    }

    pub fn metrics_summary(&self, id: ServiceId, range: &TimeRange) -> EngineResult<MetricsAggregate> {
        self.registry.get(id)?;
        Ok(self.metrics.aggregate(id, range)?)
    }

    pub fn stats(&self) -> EngineResult<DashboardStats> {
        let services = self.registry.list()?;
        let incidents = self.incidents.list()?;
        Ok(dashboard_stats(&services, &incidents, Utc::now()))
    }

    /// Prometheus text exposition for the active services.
    pub fn prometheus(&self) -> EngineResult<String> {
        Ok(render_prometheus(&self.registry.list()?))
    }
}

impl ServiceSlot {
    fn new(service: Service, health: HealthState) -> Self {
        Self {
            service,
            health,
            rules: AlertRuleState::default(),
            healthy_streak: 0,
        }
    }
}

impl ProbeSink for Engine {
    fn on_probe(&self, service_id: ServiceId, outcome: ProbeOutcome) -> SinkVerdict {
        match self.apply_probe(service_id, &outcome) {
            Ok(_) => SinkVerdict::Continue,
            Err(EngineError::NotFound(_) | EngineError::InvalidState(_)) => {
                debug!(service_id, "probe for inactive service dropped");
                SinkVerdict::Stop
            }
            Err(e) => {
                error!(service_id, error = %e, "failed to apply probe outcome");
                SinkVerdict::Continue
            }
        }
    }
}
