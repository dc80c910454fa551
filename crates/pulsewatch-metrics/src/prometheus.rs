//! Prometheus text exposition format.
//!
//! Renders the current state of monitored services into the Prometheus
//! text exposition format for scraping by a Prometheus server or
//! compatible agent.

use pulsewatch_state::{Service, ServiceStatus};

/// Render per-service gauges into Prometheus text format.
///
/// Every sample carries `service_id` and `service` (name) labels. Services
/// without checks report no uptime sample.
pub fn render_prometheus(services: &[Service]) -> String {
    let mut out = String::new();

    out.push_str("# HELP pulsewatch_service_healthy Whether the service is currently healthy (1) or not (0).\n");
    out.push_str("# TYPE pulsewatch_service_healthy gauge\n");
    for s in services {
        let healthy = u8::from(s.status == ServiceStatus::Healthy);
        out.push_str(&format!("pulsewatch_service_healthy{{{}}} {healthy}\n", labels(s)));
    }

    out.push_str("# HELP pulsewatch_service_down Whether the service is currently down (1) or not (0).\n");
    out.push_str("# TYPE pulsewatch_service_down gauge\n");
    for s in services {
        let down = u8::from(s.status == ServiceStatus::Down);
        out.push_str(&format!("pulsewatch_service_down{{{}}} {down}\n", labels(s)));
    }

    out.push_str("# HELP pulsewatch_response_time_seconds Latest probe response time in seconds.\n");
    out.push_str("# TYPE pulsewatch_response_time_seconds gauge\n");
    for s in services {
        out.push_str(&format!(
            "pulsewatch_response_time_seconds{{{}}} {:.4}\n",
            labels(s),
            s.response_time
        ));
    }

    out.push_str("# HELP pulsewatch_uptime_percent All-time uptime in percent.\n");
    out.push_str("# TYPE pulsewatch_uptime_percent gauge\n");
    for s in services {
        if let Some(uptime) = s.uptime {
            out.push_str(&format!("pulsewatch_uptime_percent{{{}}} {uptime:.2}\n", labels(s)));
        }
    }

    out.push_str("# HELP pulsewatch_checks_total Probes executed.\n");
    out.push_str("# TYPE pulsewatch_checks_total counter\n");
    for s in services {
        out.push_str(&format!("pulsewatch_checks_total{{{}}} {}\n", labels(s), s.total_checks));
    }

    out.push_str("# HELP pulsewatch_errors_total Probes that failed.\n");
    out.push_str("# TYPE pulsewatch_errors_total counter\n");
    for s in services {
        out.push_str(&format!("pulsewatch_errors_total{{{}}} {}\n", labels(s), s.error_count));
    }

    out
}

fn labels(s: &Service) -> String {
    format!("service_id=\"{}\",service=\"{}\"", s.id, escape_label(&s.name))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
