//! Incident lifecycle.
//!
//! ```text
//! none ──down──▶ open ──acknowledge / escalation──▶ investigating
//!                  │                                     │
//!                  └──────── resolve / recovery ─────────┴──▶ resolved
//! ```
//!
//! At most one unresolved incident exists per service. Resolved incidents
//! are terminal and never reopened; a later outage opens a new one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use pulsewatch_health::{Classification, ProbeOutcome};
use pulsewatch_state::{
    EscalationConfig, Incident, IncidentConfig, IncidentId, IncidentOrigin, IncidentStatus,
    RetryPolicy, Service, ServiceId, ServiceStatus, Severity, StateStore, retry_transient,
};

use crate::error::{EngineError, EngineResult};

/// Decides when an open incident moves to `investigating` on its own.
pub trait EscalationPolicy: Send + Sync {
    fn should_escalate(&self, incident: &Incident, now: DateTime<Utc>) -> bool;

    /// Whether the policy can ever escalate. Manual policies skip the
    /// per-probe incident lookup.
    fn is_automatic(&self) -> bool {
        true
    }
}

/// Only operators acknowledge incidents.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualOnly;

impl EscalationPolicy for ManualOnly {
    fn should_escalate(&self, _incident: &Incident, _now: DateTime<Utc>) -> bool {
        false
    }

    fn is_automatic(&self) -> bool {
        false
    }
}

/// Escalate incidents that stayed open for at least the given delay.
#[derive(Debug, Clone, Copy)]
pub struct AfterDelay(pub Duration);

impl EscalationPolicy for AfterDelay {
    fn should_escalate(&self, incident: &Incident, now: DateTime<Utc>) -> bool {
        let open_for = now.signed_duration_since(incident.created_at);
        open_for.to_std().is_ok_and(|d| d >= self.0)
    }
}

/// The policy a configuration names.
pub fn escalation_policy(config: &EscalationConfig) -> Box<dyn EscalationPolicy> {
    match config {
        EscalationConfig::Manual => Box::new(ManualOnly),
        EscalationConfig::After(delay) => Box::new(AfterDelay(*delay)),
    }
}

/// Input for a manually opened incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub service_id: ServiceId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

/// What one classification did to a service's incidents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentChanges {
    pub opened: Option<Incident>,
    pub escalated: Option<Incident>,
    pub resolved: Option<Incident>,
}

/// Tracks outage incidents per service.
pub struct IncidentManager {
    store: StateStore,
    retry: RetryPolicy,
    auto_resolve_after_healthy: u32,
    escalation: Box<dyn EscalationPolicy>,
}

impl IncidentManager {
    pub fn new(store: StateStore, retry: RetryPolicy, config: &IncidentConfig) -> Self {
        Self {
            store,
            retry,
            auto_resolve_after_healthy: config.auto_resolve_after_healthy,
            escalation: escalation_policy(&config.escalation),
        }
    }

    /// Replace the escalation policy.
    pub fn set_escalation(&mut self, policy: Box<dyn EscalationPolicy>) {
        self.escalation = policy;
    }

    pub fn get(&self, id: IncidentId) -> EngineResult<Incident> {
        retry_transient(&self.retry, "get incident", || self.store.get_incident(id))?
            .ok_or_else(|| EngineError::incident_not_found(id))
    }

    /// All incidents, newest first.
    pub fn list(&self) -> EngineResult<Vec<Incident>> {
        let mut incidents = retry_transient(&self.retry, "list incidents", || {
            self.store.list_incidents()
        })?;
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(incidents)
    }

    pub fn unresolved_for(&self, service_id: ServiceId) -> EngineResult<Option<Incident>> {
        Ok(retry_transient(&self.retry, "find unresolved incident", || {
            self.store.unresolved_incident_for_service(service_id)
        })?)
    }

    /// React to one classification of `service`.
    ///
    /// `healthy_streak` is the caller-owned count of consecutive healthy
    /// classifications for the service.
    pub fn on_classification(
        &self,
        service: &Service,
        classification: &Classification,
        outcome: &ProbeOutcome,
        healthy_streak: &mut u32,
    ) -> EngineResult<IncidentChanges> {
        let now = outcome.checked_at;
        let mut changes = IncidentChanges::default();

        if classification.status() == ServiceStatus::Healthy {
            *healthy_streak = healthy_streak.saturating_add(1);
        } else {
            *healthy_streak = 0;
        }

        if classification.entered(ServiceStatus::Down) {
            match self.unresolved_for(service.id)? {
                Some(existing) => {
                    debug!(service_id = service.id, incident_id = existing.id, "outage joins unresolved incident");
                }
                None => changes.opened = Some(self.open_outage(service, outcome, now)?),
            }
        }

        // Only outage incidents close on recovery; manual ones wait for an
        // operator.
        if self.auto_resolve_after_healthy > 0 && *healthy_streak >= self.auto_resolve_after_healthy {
            if let Some(incident) = self
                .unresolved_for(service.id)?
                .filter(|i| i.origin == IncidentOrigin::Outage)
            {
                info!(
                    service_id = service.id,
                    incident_id = incident.id,
                    healthy_probes = *healthy_streak,
                    "service recovered, resolving incident"
                );
                changes.resolved = Some(self.mark_resolved(incident, now)?);
            }
        }

        if changes.resolved.is_none() && self.escalation.is_automatic() {
            if let Some(incident) = self.unresolved_for(service.id)? {
                if incident.status == IncidentStatus::Open
                    && self.escalation.should_escalate(&incident, now)
                {
                    info!(incident_id = incident.id, service_id = service.id, "incident escalated");
                    changes.escalated = Some(self.mark_investigating(incident, now)?);
                }
            }
        }

        Ok(changes)
    }

    fn open_outage(
        &self,
        service: &Service,
        outcome: &ProbeOutcome,
        now: DateTime<Utc>,
    ) -> EngineResult<Incident> {
        let cause = outcome.detail.as_deref().unwrap_or("no response");
        let incident = self.insert(
            service.id,
            format!("Service {} is down", service.name),
            format!(
                "{} failed {} consecutive health checks. Last error: {cause}",
                service.url, service.consecutive_errors
            ),
            Severity::High,
            IncidentOrigin::Outage,
            now,
        )?;
        info!(
            incident_id = incident.id,
            service_id = service.id,
            "incident opened"
        );
        Ok(incident)
    }

    fn insert(
        &self,
        service_id: ServiceId,
        title: String,
        description: String,
        severity: Severity,
        origin: IncidentOrigin,
        now: DateTime<Utc>,
    ) -> EngineResult<Incident> {
        Ok(retry_transient(&self.retry, "insert incident", || {
            self.store.insert_incident(|id| Incident {
                id,
                service_id,
                title: title.clone(),
                description: description.clone(),
                severity,
                status: IncidentStatus::Open,
                origin,
                created_at: now,
                acknowledged_at: None,
                resolved_at: None,
            })
        })?)
    }

    /// Open an incident by hand. Fails if the service already has an
    /// unresolved one.
    pub fn open_manual(&self, new: NewIncident, now: DateTime<Utc>) -> EngineResult<Incident> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        if let Some(existing) = self.unresolved_for(new.service_id)? {
            return Err(EngineError::InvalidState(format!(
                "service {} already has unresolved incident {}",
                new.service_id, existing.id
            )));
        }
        let incident = self.insert(
            new.service_id,
            title.to_string(),
            new.description,
            new.severity,
            IncidentOrigin::Manual,
            now,
        )?;
        info!(incident_id = incident.id, service_id = incident.service_id, "incident opened manually");
        Ok(incident)
    }

    /// Operator acknowledgement: open → investigating.
    pub fn acknowledge(&self, id: IncidentId, now: DateTime<Utc>) -> EngineResult<Incident> {
        let incident = self.get(id)?;
        match incident.status {
            IncidentStatus::Open => {
                let incident = self.mark_investigating(incident, now)?;
                info!(incident_id = id, "incident acknowledged");
                Ok(incident)
            }
            IncidentStatus::Investigating => Err(EngineError::InvalidState(format!(
                "incident {id} is already being investigated"
            ))),
            IncidentStatus::Resolved => Err(EngineError::AlreadyResolved(Box::new(incident))),
        }
    }

    /// Resolve an incident. A resolved incident is returned unchanged
    /// inside [`EngineError::AlreadyResolved`].
    pub fn resolve(&self, id: IncidentId, now: DateTime<Utc>) -> EngineResult<Incident> {
        let incident = self.get(id)?;
        if !incident.is_unresolved() {
            return Err(EngineError::AlreadyResolved(Box::new(incident)));
        }
        let incident = self.mark_resolved(incident, now)?;
        info!(incident_id = id, service_id = incident.service_id, "incident resolved");
        Ok(incident)
    }

    fn mark_investigating(&self, mut incident: Incident, now: DateTime<Utc>) -> EngineResult<Incident> {
        incident.status = IncidentStatus::Investigating;
        incident.acknowledged_at = Some(now);
        self.put(&incident)?;
        Ok(incident)
    }

    fn mark_resolved(&self, mut incident: Incident, now: DateTime<Utc>) -> EngineResult<Incident> {
        incident.status = IncidentStatus::Resolved;
        if incident.resolved_at.is_none() {
            incident.resolved_at = Some(now);
        }
        self.put(&incident)?;
        Ok(incident)
    }

    fn put(&self, incident: &Incident) -> EngineResult<()> {
        Ok(retry_transient(&self.retry, "put incident", || {
            self.store.put_incident(incident)
        })?)
    }
}
