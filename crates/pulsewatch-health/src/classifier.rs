//! Status classification.
//!
//! [`classify`] is a pure function of the prior [`HealthState`] and one
//! [`ProbeOutcome`]. Feeding the same ordered probe history into it always
//! yields the same status and counters.

use std::collections::VecDeque;

use pulsewatch_state::{ClassifierConfig, Metric, Service, ServiceStatus, uptime_percent};

use crate::checker::ProbeOutcome;

/// Per-service classifier input: counters plus the trailing window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthState {
    pub status: ServiceStatus,
    pub total_checks: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    /// Error flags of the most recent probes, oldest first.
    pub window: VecDeque<bool>,
}

impl HealthState {
    /// Rebuild classifier state for a persisted service.
    ///
    /// Counters come from the service record; the trailing window is
    /// replayed from its most recent metrics. `recent` should reach
    /// `down_after_consecutive_errors` probes further back than the window,
    /// so a success at the window's start can still tell that it ended an
    /// outage.
    pub fn restore(service: &Service, recent: &[Metric], config: &ClassifierConfig) -> Self {
        let mut window = VecDeque::with_capacity(config.window_size);
        let mut consecutive = 0u32;
        for metric in recent {
            push_window(&mut window, consecutive, metric.error, config);
            consecutive = if metric.error { consecutive + 1 } else { 0 };
        }
        Self {
            status: if service.has_checks() {
                service.status
            } else {
                ServiceStatus::Unknown
            },
            total_checks: service.total_checks,
            error_count: service.error_count,
            consecutive_errors: service.consecutive_errors,
            window,
        }
    }

    /// Error rate (0.0–1.0) over the trailing window.
    pub fn window_error_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let errors = self.window.iter().filter(|e| **e).count();
        errors as f64 / self.window.len() as f64
    }

    /// All-time uptime in percent, `None` before the first check.
    pub fn uptime(&self) -> Option<f64> {
        uptime_percent(self.total_checks, self.error_count)
    }
}

/// Result of classifying one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub previous: ServiceStatus,
    pub state: HealthState,
    pub window_error_rate: f64,
    pub uptime: f64,
    pub response_time: f64,
}

impl Classification {
    pub fn status(&self) -> ServiceStatus {
        self.state.status
    }

    pub fn changed(&self) -> bool {
        self.previous != self.state.status
    }

    pub fn entered(&self, status: ServiceStatus) -> bool {
        self.changed() && self.state.status == status
    }

    pub fn left(&self, status: ServiceStatus) -> bool {
        self.changed() && self.previous == status
    }
}

/// Append one probe to the window.
///
/// A success that ends an outage (`consecutive_before` reached the down
/// threshold) clears the window first, so the outage does not keep the
/// recovered service degraded.
fn push_window(
    window: &mut VecDeque<bool>,
    consecutive_before: u32,
    error: bool,
    config: &ClassifierConfig,
) {
    if !error && consecutive_before >= config.down_after_consecutive_errors {
        window.clear();
    }
    window.push_back(error);
    while window.len() > config.window_size.max(1) {
        window.pop_front();
    }
}

/// Derive the next status and counters from the prior state and a probe.
pub fn classify(
    prior: &HealthState,
    outcome: &ProbeOutcome,
    config: &ClassifierConfig,
) -> Classification {
    let mut state = prior.clone();

    push_window(&mut state.window, prior.consecutive_errors, outcome.error, config);
    state.total_checks += 1;
    if outcome.error {
        state.error_count += 1;
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
    } else {
        state.consecutive_errors = 0;
    }

    let window_error_rate = state.window_error_rate();
    state.status = if state.consecutive_errors >= config.down_after_consecutive_errors {
        ServiceStatus::Down
    } else if window_error_rate > config.degraded_error_rate
        || outcome.response_time > config.slow_response_secs
    {
        ServiceStatus::Degraded
    } else {
        ServiceStatus::Healthy
    };

    let uptime = state.uptime().unwrap_or(0.0);
    Classification {
        previous: prior.status,
        state,
        window_error_rate,
        uptime,
        response_time: outcome.response_time,
    }
}
