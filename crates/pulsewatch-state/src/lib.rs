//! pulsewatch-state: domain model and embedded state store for pulsewatch.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for monitored services, probe metrics, incidents, and alerts.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Services and incidents are keyed by their numeric id; metrics and alerts
//! use `{service_id:020}:{seq:020}` composite keys so that all records of one
//! service form a contiguous, arrival-ordered range.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Transient failures are retried by
//! [`retry_transient`] according to a [`RetryPolicy`].

pub mod config;
pub mod error;
pub mod retry;
pub mod store;
pub mod tables;
pub mod types;

pub use config::{
    AlertThresholds, ClassifierConfig, ConfigError, EscalationConfig, IncidentConfig,
    MetricsConfig, MonitorConfig, ProbeConfig, parse_duration,
};
pub use error::{StateError, StateResult};
pub use retry::{RetryPolicy, retry_transient};
pub use store::StateStore;
pub use types::*;
