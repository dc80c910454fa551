//! `pulsewatch.toml` configuration.
//!
//! Every threshold the classifier, alert engine, and incident manager use
//! lives here with a documented default, so operators can tune a
//! deployment without code changes. All sections are optional.
//!
//! ```toml
//! [probe]
//! interval = "30s"
//! timeout = "5s"
//!
//! [classifier]
//! down_after_consecutive_errors = 3
//! window_size = 20
//! degraded_error_rate = 0.05
//! slow_response_secs = 2.0
//!
//! [alerts]
//! response_time_secs = 2.0
//! response_time_consecutive = 3
//! error_rate = 0.05
//! error_rate_hysteresis = 0.02
//! uptime_percent = 99.0
//!
//! [incidents]
//! auto_resolve_after_healthy = 3
//! escalation = { after = "10m" }
//!
//! [metrics]
//! retention = "7d"          # or "unbounded"
//! prune_interval = "10m"
//!
//! [store]
//! max_attempts = 3
//! initial_backoff = "10ms"
//! max_backoff = "200ms"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub probe: ProbeConfig,
    pub classifier: ClassifierConfig,
    pub alerts: AlertThresholds,
    pub incidents: IncidentConfig,
    pub metrics: MetricsConfig,
    pub store: RetryPolicy,
}

/// Probe scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Time between two checks of the same service.
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Upper bound for a single check.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            user_agent: "pulsewatch/0.1".to_string(),
        }
    }
}

/// Status classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Consecutive errors before a service is `down`.
    pub down_after_consecutive_errors: u32,
    /// Number of most recent probes in the trailing window.
    pub window_size: usize,
    /// Window error rate (0.0–1.0) above which a service is `degraded`.
    pub degraded_error_rate: f64,
    /// Latest response time (seconds) above which a service is `degraded`.
    pub slow_response_secs: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            down_after_consecutive_errors: 3,
            window_size: 20,
            degraded_error_rate: 0.05,
            slow_response_secs: 2.0,
        }
    }
}

/// Alert rule thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertThresholds {
    /// `high_response_time` trigger, seconds.
    pub response_time_secs: f64,
    /// Consecutive slow (or fast) probes needed to fire (or clear).
    pub response_time_consecutive: u32,
    /// `high_error_rate` trigger on the trailing window (0.0–1.0).
    pub error_rate: f64,
    /// The alert clears only below `error_rate - error_rate_hysteresis`.
    pub error_rate_hysteresis: f64,
    /// `low_uptime` trigger, percent.
    pub uptime_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time_secs: 2.0,
            response_time_consecutive: 3,
            error_rate: 0.05,
            error_rate_hysteresis: 0.02,
            uptime_percent: 99.0,
        }
    }
}

/// Incident lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IncidentConfig {
    /// Consecutive healthy classifications that auto-resolve an incident.
    /// Zero disables automatic resolution.
    pub auto_resolve_after_healthy: u32,
    pub escalation: EscalationConfig,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            auto_resolve_after_healthy: 3,
            escalation: EscalationConfig::Manual,
        }
    }
}

/// How an open incident moves to `investigating`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationConfig {
    /// Only by operator acknowledgement.
    #[default]
    Manual,
    /// Automatically once the incident has been open this long.
    After(#[serde(with = "duration_str")] Duration),
}

/// Metric retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples older than this are pruned; `"unbounded"` keeps everything.
    #[serde(with = "duration_str_opt")]
    pub retention: Option<Duration>,
    #[serde(with = "duration_str")]
    pub prune_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention: Some(Duration::from_secs(7 * 86_400)),
            prune_interval: Duration::from_secs(600),
        }
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.probe.interval.is_zero() {
            return invalid("probe.interval must be greater than zero");
        }
        if self.probe.timeout.is_zero() {
            return invalid("probe.timeout must be greater than zero");
        }
        if self.classifier.down_after_consecutive_errors == 0 {
            return invalid("classifier.down_after_consecutive_errors must be at least 1");
        }
        if self.classifier.window_size == 0 {
            return invalid("classifier.window_size must be at least 1");
        }
        if !is_rate(self.classifier.degraded_error_rate) {
            return invalid("classifier.degraded_error_rate must be within 0.0..=1.0");
        }
        if self.classifier.slow_response_secs <= 0.0 {
            return invalid("classifier.slow_response_secs must be positive");
        }
        if self.alerts.response_time_secs <= 0.0 {
            return invalid("alerts.response_time_secs must be positive");
        }
        if self.alerts.response_time_consecutive == 0 {
            return invalid("alerts.response_time_consecutive must be at least 1");
        }
        if !is_rate(self.alerts.error_rate) || !is_rate(self.alerts.error_rate_hysteresis) {
            return invalid("alerts.error_rate and error_rate_hysteresis must be within 0.0..=1.0");
        }
        if !(0.0..=100.0).contains(&self.alerts.uptime_percent) {
            return invalid("alerts.uptime_percent must be within 0..=100");
        }
        if self.metrics.prune_interval.is_zero() {
            return invalid("metrics.prune_interval must be greater than zero");
        }
        if self.store.max_attempts == 0 {
            return invalid("store.max_attempts must be at least 1");
        }
        if self.probe.timeout >= self.probe.interval {
            tracing::warn!(
                timeout = ?self.probe.timeout,
                interval = ?self.probe.interval,
                "probe timeout is not shorter than the interval; slow checks will skip ticks"
            );
        }
        Ok(())
    }
}

fn is_rate(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

/// Parse a duration string like "500ms", "30s", "5m", "2h", "7d".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let (number, multiplier) = match s.chars().last()? {
        's' => (&s[..s.len() - 1], 1),
        'm' => (&s[..s.len() - 1], 60),
        'h' => (&s[..s.len() - 1], 3_600),
        'd' => (&s[..s.len() - 1], 86_400),
        _ => (s, 1),
    };
    let value = number.trim().parse::<u64>().ok()?;
    value.checked_mul(multiplier).map(Duration::from_secs)
}

/// Inverse of [`parse_duration`], using the largest exact unit.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }
    let secs = d.as_secs();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
}

pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid duration: {raw:?}")))
    }
}

pub(crate) mod duration_str_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    const UNBOUNDED: &str = "unbounded";

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_str(&super::format_duration(*d)),
            None => s.serialize_str(UNBOUNDED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.trim() == UNBOUNDED {
            return Ok(None);
        }
        super::parse_duration(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid duration: {raw:?}")))
    }
}
