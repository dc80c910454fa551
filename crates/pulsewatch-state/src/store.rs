//! StateStore: redb-backed state persistence for pulsewatch.
//!
//! Provides typed operations over services, metrics, incidents, and alerts.
//! All values are JSON-serialized into redb's `&[u8]` value columns. Ids are
//! allocated from the `sequences` table inside the same write transaction
//! that inserts the record, so concurrent creators never collide. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Bump a named sequence inside an open write transaction.
fn allocate(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
        txn.open_table(ALERTS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Services ───────────────────────────────────────────────────

    /// Allocate an id and store a new service built from it.
    pub fn insert_service(&self, build: impl FnOnce(ServiceId) -> Service) -> StateResult<Service> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let service = build(allocate(&txn, SEQ_SERVICE)?);
        let value = encode(&service)?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            table
                .insert(service.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service_id = service.id, "service inserted");
        Ok(service)
    }

    /// Overwrite an existing service record.
    pub fn put_service(&self, service: &Service) -> StateResult<()> {
        let value = encode(service)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            table
                .insert(service.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a service by id, including removed ones.
    pub fn get_service(&self, id: ServiceId) -> StateResult<Option<Service>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all services in ascending id order, including removed ones.
    pub fn list_services(&self) -> StateResult<Vec<Service>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Append a metric sample. Returns its arrival sequence number.
    pub fn append_metric(&self, metric: &Metric) -> StateResult<u64> {
        let value = encode(metric)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq = allocate(&txn, SEQ_METRIC)?;
        {
            let key = composite_key(metric.service_id, seq);
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(seq)
    }

    /// All metrics of a service in arrival order.
    pub fn list_metrics_for_service(&self, service_id: ServiceId) -> StateResult<Vec<Metric>> {
        let (lo, hi) = service_key_bounds(service_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(lo.as_str()..=hi.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// The `limit` most recent metrics of a service, oldest first.
    pub fn recent_metrics(&self, service_id: ServiceId, limit: usize) -> StateResult<Vec<Metric>> {
        let (lo, hi) = service_key_bounds(service_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(limit);
        for entry in table
            .range(lo.as_str()..=hi.as_str())
            .map_err(map_err!(Read))?
            .rev()
            .take(limit)
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        results.reverse();
        Ok(results)
    }

    /// Delete all metrics recorded before `cutoff`. Returns number deleted.
    pub fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> StateResult<u64> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let metric: Metric = decode(value.value())?;
                if metric.timestamp < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deleted = keys.len(), %cutoff, "metrics pruned");
        Ok(keys.len() as u64)
    }

    // ── Incidents ──────────────────────────────────────────────────

    /// Allocate an id and store a new incident built from it.
    pub fn insert_incident(
        &self,
        build: impl FnOnce(IncidentId) -> Incident,
    ) -> StateResult<Incident> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let incident = build(allocate(&txn, SEQ_INCIDENT)?);
        let value = encode(&incident)?;
        {
            let mut table = txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
            table
                .insert(incident.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(incident)
    }

    /// Overwrite an existing incident record.
    pub fn put_incident(&self, incident: &Incident) -> StateResult<()> {
        let value = encode(incident)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
            table
                .insert(incident.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_incident(&self, id: IncidentId) -> StateResult<Option<Incident>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all incidents in ascending id order.
    pub fn list_incidents(&self) -> StateResult<Vec<Incident>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INCIDENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// The open or investigating incident of a service, if any.
    pub fn unresolved_incident_for_service(
        &self,
        service_id: ServiceId,
    ) -> StateResult<Option<Incident>> {
        Ok(self
            .list_incidents()?
            .into_iter()
            .find(|i| i.service_id == service_id && i.is_unresolved()))
    }

    // ── Alerts ─────────────────────────────────────────────────────

    /// Allocate an id and store a new alert built from it.
    pub fn insert_alert(&self, build: impl FnOnce(AlertId) -> Alert) -> StateResult<Alert> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let alert = build(allocate(&txn, SEQ_ALERT)?);
        let value = encode(&alert)?;
        {
            let key = alert.table_key();
            let mut table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(alert)
    }

    /// Overwrite an existing alert record.
    pub fn put_alert(&self, alert: &Alert) -> StateResult<()> {
        let key = alert.table_key();
        let value = encode(alert)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all alerts, grouped by service then id.
    pub fn list_alerts(&self) -> StateResult<Vec<Alert>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// All alerts of one service in id order.
    pub fn alerts_for_service(&self, service_id: ServiceId) -> StateResult<Vec<Alert>> {
        let (lo, hi) = service_key_bounds(service_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(lo.as_str()..=hi.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Unresolved alerts of one service and kind, oldest first.
    ///
    /// Holds at most one entry while the dedup invariant is intact.
    pub fn active_alerts(&self, service_id: ServiceId, kind: AlertKind) -> StateResult<Vec<Alert>> {
        Ok(self
            .alerts_for_service(service_id)?
            .into_iter()
            .filter(|a| a.kind == kind && a.is_active())
            .collect())
    }
}
