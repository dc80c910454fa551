//! pulsewatch-metrics: probe time series for monitored services.
//!
//! Records one [`Metric`](pulsewatch_state::Metric) per probe, answers
//! range queries and statistical summaries over them, prunes samples past
//! the retention window, and renders Prometheus text exposition.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── record() ← called once per probe
//!   ├── query() / aggregate() → range reads for the API
//!   ├── prune() → deletes samples older than the retention window
//!   └── run() → periodic prune loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /api/metrics
//! ```

pub mod prometheus;
pub mod range;
pub mod store;

pub use prometheus::render_prometheus;
pub use range::{DEFAULT_RANGE, TimeRange};
pub use store::{MetricsAggregate, MetricsStore, compute_percentiles};
