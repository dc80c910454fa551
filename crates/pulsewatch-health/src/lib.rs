//! pulsewatch-health: health checking for monitored HTTP endpoints.
//!
//! Provides HTTP probes, the pure status classifier, and the monitor that
//! runs one background probe task per service.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor
//!   ├── Per-service background task (interval, missed ticks skipped)
//!   │   ├── check_once() → Probe::probe() bounded by the check timeout
//!   │   └── ProbeSink::on_probe(service_id, ProbeOutcome)
//!   └── start_monitor / stop_monitor / stop_all
//!
//! classify(HealthState, ProbeOutcome) → Classification   (pure)
//! ```
//!
//! # Classification
//!
//! A service is `down` after N consecutive errors and stays down until a
//! successful probe. Otherwise it is `degraded` when the trailing-window
//! error rate or the latest response time crosses its threshold, and
//! `healthy` when neither does. Before the first probe it is `unknown`.

pub mod checker;
pub mod classifier;
pub mod monitor;

pub use checker::{BoxFuture, HttpProbe, Probe, ProbeOutcome, is_error_status};
pub use classifier::{Classification, HealthState, classify};
pub use monitor::{HealthMonitor, ProbeSink, SinkVerdict, check_once};
