//! pulsewatch-engine: the health-monitoring and alerting core.
//!
//! Turns probe outcomes into service status, metrics, incidents, and
//! alerts, and exposes the commands and queries the API serves.
//!
//! # Architecture
//!
//! ```text
//! MonitorService
//!   ├── HealthMonitor (one probe task per active service)
//!   │     └── ProbeSink::on_probe ──▶ Engine::apply_probe
//!   └── Engine
//!         ├── per-service lock ─▶ classify → Registry → MetricsStore
//!         │                          → IncidentManager → AlertEngine
//!         └── queries: services, incidents, alerts, metrics, stats
//! ```

pub mod alerts;
pub mod engine;
pub mod error;
pub mod incidents;
pub mod registry;
pub mod service;
pub mod stats;

pub use alerts::{AlertChanges, AlertEngine, AlertRuleState};
pub use engine::{Engine, ProbeReport};
pub use error::{EngineError, EngineResult};
pub use incidents::{
    AfterDelay, EscalationPolicy, IncidentChanges, IncidentManager, ManualOnly, NewIncident,
    escalation_policy,
};
pub use registry::{Registry, validate_service};
pub use service::MonitorService;
pub use stats::dashboard_stats;
