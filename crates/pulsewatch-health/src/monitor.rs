//! Health monitor: one background probe task per monitored service.
//!
//! Each task probes its service on a fixed interval and hands every
//! outcome to a [`ProbeSink`]. A probe for a given service never overlaps
//! the previous one; ticks missed while a slow probe runs are skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use pulsewatch_state::{ProbeConfig, ServiceId};

use crate::checker::{Probe, ProbeOutcome};

/// What the probe loop should do after an outcome was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkVerdict {
    Continue,
    /// The service is gone; end the loop.
    Stop,
}

/// Receives probe outcomes in completion order, per service.
pub trait ProbeSink: Send + Sync {
    fn on_probe(&self, service_id: ServiceId, outcome: ProbeOutcome) -> SinkVerdict;
}

/// Per-service monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages probe tasks for all monitored services.
pub struct HealthMonitor {
    probe: Arc<dyn Probe>,
    sink: Arc<dyn ProbeSink>,
    interval: Duration,
    timeout: Duration,
    /// Active monitors: service_id → slot.
    monitors: Arc<RwLock<HashMap<ServiceId, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn Probe>, sink: Arc<dyn ProbeSink>, config: &ProbeConfig) -> Self {
        Self {
            probe,
            sink,
            interval: config.interval,
            timeout: config.timeout,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start probing `url` for `service_id`. The first probe runs
    /// immediately. An existing monitor for the same service is replaced.
    pub async fn start_monitor(&self, service_id: ServiceId, url: &str) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_probe_loop(
            service_id,
            url.to_string(),
            self.probe.clone(),
            self.sink.clone(),
            self.interval,
            self.timeout,
            shutdown_rx,
        ));

        let old = {
            let mut monitors = self.monitors.write().await;
            monitors.insert(
                service_id,
                MonitorSlot {
                    handle,
                    shutdown_tx,
                },
            )
        };
        if let Some(old) = old {
            stop_slot(old).await;
        }

        info!(service_id, %url, interval = ?self.interval, "health monitor started");
    }

    /// Stop monitoring a service. Once this returns, the sink receives no
    /// further outcomes for it. Returns `false` if no monitor was running.
    pub async fn stop_monitor(&self, service_id: ServiceId) -> bool {
        let slot = self.monitors.write().await.remove(&service_id);
        match slot {
            Some(slot) => {
                stop_slot(slot).await;
                info!(service_id, "health monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.monitors.write().await.drain().collect();
        for (id, slot) in slots {
            stop_slot(slot).await;
            debug!(service_id = id, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    /// Service IDs whose probe loop is still running, ascending.
    pub async fn active_monitors(&self) -> Vec<ServiceId> {
        let monitors = self.monitors.read().await;
        let mut ids: Vec<_> = monitors
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_monitoring(&self, service_id: ServiceId) -> bool {
        let monitors = self.monitors.read().await;
        monitors
            .get(&service_id)
            .is_some_and(|slot| !slot.handle.is_finished())
    }
}

async fn stop_slot(slot: MonitorSlot) {
    let _ = slot.shutdown_tx.send(true);
    slot.handle.abort();
    // Cancelled or finished either way; only the join matters.
    let _ = slot.handle.await;
}

/// Run one probe against `url`, bounded by `timeout`.
pub async fn check_once(probe: &dyn Probe, url: &str, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, probe.probe(url)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::timed_out(timeout, Utc::now()),
    }
}

/// The probe loop for a single service.
async fn run_probe_loop(
    service_id: ServiceId,
    url: String,
    probe: Arc<dyn Probe>,
    sink: Arc<dyn ProbeSink>,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(service_id, %url, "probe loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let outcome = tokio::select! {
            outcome = check_once(probe.as_ref(), &url, timeout) => outcome,
            _ = shutdown.changed() => break,
        };
        if *shutdown.borrow() {
            break;
        }

        if sink.on_probe(service_id, outcome) == SinkVerdict::Stop {
            debug!(service_id, "sink rejected service, probe loop ending");
            return;
        }
    }

    debug!(service_id, "probe loop shutting down");
}
