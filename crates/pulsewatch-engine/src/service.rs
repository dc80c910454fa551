//! Async facade pairing the engine with its probe tasks.
//!
//! Creating a service starts its monitor; removing one stops the monitor
//! (waiting for an in-flight probe to settle) before the service is marked
//! inactive, so no metric is recorded for it afterwards.

use std::sync::Arc;

use tracing::{info, warn};

use pulsewatch_health::{HealthMonitor, Probe, ProbeSink};
use pulsewatch_state::{Service, ServiceId};

use crate::engine::Engine;
use crate::error::EngineResult;

pub struct MonitorService {
    engine: Arc<Engine>,
    monitor: HealthMonitor,
}

impl MonitorService {
    pub fn new(engine: Arc<Engine>, probe: Arc<dyn Probe>) -> Self {
        let sink: Arc<dyn ProbeSink> = engine.clone();
        let monitor = HealthMonitor::new(probe, sink, &engine.config().probe);
        Self { engine, monitor }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Start probing every active service. Returns how many were started.
    pub async fn start(&self) -> EngineResult<usize> {
        let services = self.engine.list_services()?;
        for service in &services {
            self.monitor.start_monitor(service.id, &service.url).await;
        }
        info!(services = services.len(), "monitoring started");
        Ok(services.len())
    }

    /// Register a service and probe it right away.
    pub async fn add_service(&self, name: &str, url: &str) -> EngineResult<Service> {
        let service = self.engine.create_service(name, url)?;
        self.monitor.start_monitor(service.id, &service.url).await;
        Ok(service)
    }

    /// Stop probing a service, then soft-delete it.
    pub async fn remove_service(&self, id: ServiceId) -> EngineResult<Service> {
        let was_monitored = self.monitor.stop_monitor(id).await;
        match self.engine.remove_service(id) {
            Ok(service) => Ok(service),
            Err(e) => {
                // The service may still be active; keep probing it.
                if was_monitored
                    && let Ok(service) = self.engine.get_service(id)
                    && service.active
                {
                    warn!(service_id = id, error = %e, "removal failed, monitor restarted");
                    self.monitor.start_monitor(id, &service.url).await;
                }
                Err(e)
            }
        }
    }

    pub async fn active_monitors(&self) -> Vec<ServiceId> {
        self.monitor.active_monitors().await
    }

    /// Stop all probe tasks (for graceful shutdown).
    pub async fn shutdown(&self) {
        self.monitor.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulsewatch_health::{BoxFuture, ProbeOutcome};
    use pulsewatch_metrics::TimeRange;
    use pulsewatch_state::{MonitorConfig, ServiceStatus, StateStore};
    use std::time::Duration;

    struct StaticProbe {
        status: u16,
    }

    impl Probe for StaticProbe {
        fn probe<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, ProbeOutcome> {
            Box::pin(async move {
                ProbeOutcome::from_status(self.status, Duration::from_millis(5), Utc::now())
            })
        }
    }

    fn service_with(status: u16, interval_ms: u64) -> MonitorService {
        let mut config = MonitorConfig::default();
        config.probe.interval = Duration::from_millis(interval_ms);
        config.probe.timeout = Duration::from_millis(500);
        let engine = Engine::new(StateStore::open_in_memory().unwrap(), config).unwrap();
        MonitorService::new(Arc::new(engine), Arc::new(StaticProbe { status }))
    }

    fn last_hour() -> TimeRange {
        TimeRange::last(Duration::from_secs(3600), Utc::now() + chrono::Duration::seconds(1))
    }

    #[tokio::test]
    async fn new_service_is_probed_immediately() {
        let svc = service_with(200, 60_000);
        let created = svc.add_service("api", "https://api.example").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let current = svc.engine().get_service(created.id).unwrap();
        assert_eq!(current.total_checks, 1);
        assert_eq!(current.status, ServiceStatus::Healthy);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn failing_endpoint_goes_down() {
        let svc = service_with(503, 10);
        let created = svc.add_service("api", "https://api.example").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        svc.shutdown().await;

        let current = svc.engine().get_service(created.id).unwrap();
        assert_eq!(current.status, ServiceStatus::Down);
        assert_eq!(svc.engine().list_incidents().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removal_halts_metric_recording() {
        let svc = service_with(200, 10);
        let created = svc.add_service("api", "https://api.example").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let removed = svc.remove_service(created.id).await.unwrap();
        assert!(!removed.active);
        assert!(svc.active_monitors().await.is_empty());

        let count = svc.engine().service_metrics(created.id, &last_hour()).unwrap().len();
        assert!(count >= 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            svc.engine().service_metrics(created.id, &last_hour()).unwrap().len(),
            count
        );
    }

    #[tokio::test]
    async fn start_resumes_persisted_services() {
        let svc = service_with(200, 60_000);
        svc.engine().create_service("a", "https://a.example").unwrap();
        let b = svc.engine().create_service("b", "https://b.example").unwrap();
        svc.engine().remove_service(b.id).unwrap();

        assert_eq!(svc.start().await.unwrap(), 1);
        assert_eq!(svc.active_monitors().await.len(), 1);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn removing_unknown_service_fails() {
        let svc = service_with(200, 60_000);
        assert!(svc.remove_service(42).await.is_err());
    }
}
