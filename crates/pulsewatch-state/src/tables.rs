//! redb table definitions for the pulsewatch state store.
//!
//! Record tables use JSON-serialized `&[u8]` values. Composite keys follow
//! the pattern `{service_id:020}:{seq:020}` so lexical order equals numeric
//! order and a service's records can be range-scanned.

use redb::TableDefinition;

/// Monitored services keyed by id.
pub const SERVICES: TableDefinition<u64, &[u8]> = TableDefinition::new("services");

/// Probe metrics keyed by `{service_id}:{seq}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");

/// Incidents keyed by id.
pub const INCIDENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("incidents");

/// Alerts keyed by `{service_id}:{alert_id}`.
pub const ALERTS: TableDefinition<&str, &[u8]> = TableDefinition::new("alerts");

/// Monotonic id allocators keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const SEQ_SERVICE: &str = "service";
pub const SEQ_METRIC: &str = "metric";
pub const SEQ_INCIDENT: &str = "incident";
pub const SEQ_ALERT: &str = "alert";

/// Build a composite `{service_id}:{seq}` key.
pub fn composite_key(service_id: u64, seq: u64) -> String {
    format!("{service_id:020}:{seq:020}")
}

/// Inclusive key bounds covering every composite key of one service.
pub fn service_key_bounds(service_id: u64) -> (String, String) {
    (
        composite_key(service_id, 0),
        composite_key(service_id, u64::MAX),
    )
}
