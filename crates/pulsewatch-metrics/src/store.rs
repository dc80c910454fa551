//! Metrics store: append-only probe samples per service.
//!
//! Persists every sample through the state store, retrying transient
//! failures, and derives range summaries on read. Nothing is cached, so a
//! summary always reflects exactly the samples in its range.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use pulsewatch_state::{
    Metric, MetricsConfig, RetryPolicy, ServiceId, StateResult, StateStore, retry_transient,
};

use crate::range::TimeRange;

/// Statistical summary of one service's samples in a range.
///
/// Response-time figures use non-error samples with a positive duration;
/// they are `None` when there are none. Rates are `None` for an empty range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsAggregate {
    pub service_id: ServiceId,
    pub range: TimeRange,
    pub samples: usize,
    pub avg_response_time: Option<f64>,
    pub p50_response_time: Option<f64>,
    pub p95_response_time: Option<f64>,
    /// Errors over all samples (0.0–1.0).
    pub error_rate: Option<f64>,
    pub avg_uptime: Option<f64>,
}

/// Probe time series backed by the state store.
#[derive(Clone)]
pub struct MetricsStore {
    state: StateStore,
    retry: RetryPolicy,
    /// Samples older than this are pruned; `None` keeps everything.
    retention: Option<Duration>,
    prune_interval: Duration,
}

impl MetricsStore {
    pub fn new(state: StateStore, config: &MetricsConfig, retry: RetryPolicy) -> Self {
        Self {
            state,
            retry,
            retention: config.retention,
            prune_interval: config.prune_interval,
        }
    }

    /// Append a sample. Samples of one service keep arrival order.
    pub fn record(&self, metric: &Metric) -> StateResult<u64> {
        let seq = retry_transient(&self.retry, "record metric", || {
            self.state.append_metric(metric)
        })?;
        debug!(
            service_id = metric.service_id,
            seq,
            response_time = metric.response_time,
            error = metric.error,
            "metric recorded"
        );
        Ok(seq)
    }

    /// Samples of a service within `range`, ascending by timestamp.
    /// Samples with equal timestamps keep arrival order.
    pub fn query(&self, service_id: ServiceId, range: &TimeRange) -> StateResult<Vec<Metric>> {
        let all = retry_transient(&self.retry, "query metrics", || {
            self.state.list_metrics_for_service(service_id)
        })?;
        let mut in_range: Vec<Metric> = all
            .into_iter()
            .filter(|m| range.contains(m.timestamp))
            .collect();
        in_range.sort_by_key(|m| m.timestamp);
        Ok(in_range)
    }

    /// The `limit` most recent samples of a service, oldest first.
    pub fn recent(&self, service_id: ServiceId, limit: usize) -> StateResult<Vec<Metric>> {
        retry_transient(&self.retry, "recent metrics", || {
            self.state.recent_metrics(service_id, limit)
        })
    }

    /// Summarize the samples of a service within `range`.
    pub fn aggregate(&self, service_id: ServiceId, range: &TimeRange) -> StateResult<MetricsAggregate> {
        let samples = self.query(service_id, range)?;
        Ok(summarize(service_id, *range, &samples))
    }

    /// Delete samples past the retention window. Returns the number deleted.
    pub fn prune(&self, now: DateTime<Utc>) -> StateResult<u64> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        let cutoff = TimeRange::last(retention, now).start;
        retry_transient(&self.retry, "prune metrics", || {
            self.state.prune_metrics_before(cutoff)
        })
    }

    /// Run the prune loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.retention.is_none() {
            info!("metrics retention unbounded, prune loop idle");
            let _ = shutdown.changed().await;
            return;
        }
        info!(
            retention = ?self.retention,
            interval = ?self.prune_interval,
            "metrics pruner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.prune_interval) => {
                    match self.prune(Utc::now()) {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "expired metrics pruned"),
                        Err(e) => error!(error = %e, "metrics prune failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("metrics pruner shutting down");
                    break;
                }
            }
        }
    }
}

fn summarize(service_id: ServiceId, range: TimeRange, samples: &[Metric]) -> MetricsAggregate {
    let timings: Vec<f64> = samples
        .iter()
        .filter(|m| !m.error && m.response_time > 0.0)
        .map(|m| m.response_time)
        .collect();
    let (p50, p95) = compute_percentiles(&timings)
        .map(|(p50, p95)| (Some(p50), Some(p95)))
        .unwrap_or((None, None));

    let n = samples.len();
    let errors = samples.iter().filter(|m| m.error).count();
    MetricsAggregate {
        service_id,
        range,
        samples: n,
        avg_response_time: mean(&timings),
        p50_response_time: p50,
        p95_response_time: p95,
        error_rate: (n > 0).then(|| errors as f64 / n as f64),
        avg_uptime: mean(&samples.iter().map(|m| m.uptime).collect::<Vec<_>>()),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Compute P50 and P95 of the samples with the nearest-rank method:
/// sort ascending, take index `⌊n·p⌋` clamped to the last element.
///
/// Returns `None` for an empty slice.
pub fn compute_percentiles(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p95_idx = (sorted.len() as f64 * 0.95) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)];
    let p95 = sorted[p95_idx.min(sorted.len() - 1)];

    Some((p50, p95))
}
