//! Health check probe logic.
//!
//! Performs one HTTP GET against a service URL and reduces the result to a
//! [`ProbeOutcome`]. A probe never fails: connection errors, timeouts, and
//! server errors all become outcomes with `error = true`.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use pulsewatch_state::ProbeConfig;

/// Boxed future returned by [`Probe`] implementations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// When the probe completed.
    pub checked_at: DateTime<Utc>,
    /// Probe duration in seconds.
    pub response_time: f64,
    /// HTTP status, `None` when no response arrived.
    pub status_code: Option<u16>,
    pub error: bool,
    /// Human-readable failure reason for error outcomes.
    pub detail: Option<String>,
}

impl ProbeOutcome {
    /// An outcome for a received HTTP response.
    pub fn from_status(status: u16, elapsed: Duration, checked_at: DateTime<Utc>) -> Self {
        let error = is_error_status(Some(status));
        Self {
            checked_at,
            response_time: elapsed.as_secs_f64(),
            status_code: Some(status),
            error,
            detail: error.then(|| format!("HTTP {status}")),
        }
    }

    /// An outcome for a request that produced no response.
    pub fn failed(detail: impl Into<String>, elapsed: Duration, checked_at: DateTime<Utc>) -> Self {
        Self {
            checked_at,
            response_time: elapsed.as_secs_f64(),
            status_code: None,
            error: true,
            detail: Some(detail.into()),
        }
    }

    /// An outcome for a check that exceeded its timeout.
    pub fn timed_out(elapsed: Duration, checked_at: DateTime<Utc>) -> Self {
        Self::failed(
            format!("timed out after {:.3}s", elapsed.as_secs_f64()),
            elapsed,
            checked_at,
        )
    }
}

/// Server errors and missing responses count as failures; everything
/// else (including 4xx) means the endpoint is up.
pub fn is_error_status(status: Option<u16>) -> bool {
    status.is_none_or(|code| code >= 500)
}

/// Something that can check a URL.
///
/// The monitor enforces the per-check timeout around `probe`, so
/// implementations need not.
pub trait Probe: Send + Sync {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProbeOutcome>;
}

/// Probe backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Build a probe whose client enforces the configured timeout and user agent.
    pub fn new(config: &ProbeConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }
}

impl Probe for HttpProbe {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, ProbeOutcome> {
        Box::pin(http_probe(&self.client, url))
    }
}

/// Perform an HTTP GET against `url`.
async fn http_probe(client: &reqwest::Client, url: &str) -> ProbeOutcome {
    let started = Instant::now();
    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let outcome = ProbeOutcome::from_status(status, started.elapsed(), Utc::now());
            if outcome.error {
                debug!(status, %url, "health probe server error");
            }
            outcome
        }
        Err(e) if e.is_timeout() => {
            debug!(%url, "health probe timed out");
            ProbeOutcome::timed_out(started.elapsed(), Utc::now())
        }
        Err(e) => {
            debug!(error = %e, %url, "health probe request failed");
            ProbeOutcome::failed(e.to_string(), started.elapsed(), Utc::now())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe_with_timeout(timeout: Duration) -> HttpProbe {
        HttpProbe::new(&ProbeConfig {
            timeout,
            ..ProbeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn error_status_classification() {
        assert!(is_error_status(None));
        assert!(is_error_status(Some(500)));
        assert!(is_error_status(Some(503)));
        assert!(!is_error_status(Some(200)));
        assert!(!is_error_status(Some(301)));
        assert!(!is_error_status(Some(404)));
    }

    #[test]
    fn outcome_constructors() {
        let now = Utc::now();
        let ok = ProbeOutcome::from_status(200, Duration::from_millis(120), now);
        assert!(!ok.error);
        assert_eq!(ok.status_code, Some(200));
        assert!((ok.response_time - 0.12).abs() < 1e-9);
        assert!(ok.detail.is_none());

        let bad = ProbeOutcome::from_status(502, Duration::from_millis(5), now);
        assert!(bad.error);
        assert_eq!(bad.detail.as_deref(), Some("HTTP 502"));

        let timeout = ProbeOutcome::timed_out(Duration::from_secs(5), now);
        assert!(timeout.error);
        assert_eq!(timeout.status_code, None);
    }

    #[tokio::test]
    async fn http_probe_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = probe_with_timeout(Duration::from_secs(2));
        let url = format!("{}/healthz", server.uri());
        let outcome = probe.probe(&url).await;
        assert!(!outcome.error);
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn http_probe_client_error_is_not_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = probe_with_timeout(Duration::from_secs(2))
            .probe(&server.uri())
            .await;
        assert!(!outcome.error);
        assert_eq!(outcome.status_code, Some(404));
    }

    #[tokio::test]
    async fn http_probe_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = probe_with_timeout(Duration::from_secs(2))
            .probe(&server.uri())
            .await;
        assert!(outcome.error);
        assert_eq!(outcome.status_code, Some(503));
    }

    #[tokio::test]
    async fn http_probe_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let outcome = probe_with_timeout(Duration::from_millis(50))
            .probe(&server.uri())
            .await;
        assert!(outcome.error);
        assert_eq!(outcome.status_code, None);
    }

    #[tokio::test]
    async fn http_probe_to_closed_port_fails() {
        let outcome = probe_with_timeout(Duration::from_millis(500))
            .probe("http://127.0.0.1:1/healthz")
            .await;
        assert!(outcome.error);
        assert_eq!(outcome.status_code, None);
        assert!(outcome.detail.is_some());
    }
}
