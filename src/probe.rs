//! Post-deploy health probing.
//!
//! A [`HealthProbe`] performs one check; [`wait_until_healthy`] drives the
//! bounded retry loop: exactly `attempts` probes, `interval` apart, with no
//! sleep after the last one.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::HealthCheckConfig;
use crate::error::{DeployError, Result};

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointCheck {
    /// Probed URL.
    pub url: String,
    /// Whether the check passed.
    pub healthy: bool,
    /// HTTP status code (if a response arrived).
    pub status_code: Option<u16>,
    /// Response time in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Error message (if any).
    pub error: Option<String>,
}

/// Summary of a successful wait.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Probed URL.
    pub url: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// The check that succeeded.
    pub last_check: EndpointCheck,
}

/// One health check against a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes `url` once.
    async fn check(&self, url: &str) -> EndpointCheck;
}

/// HTTP implementation; any 2xx counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    /// Creates a probe with the configured per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &HealthCheckConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DeployError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> EndpointCheck {
        let start = Instant::now();

        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                let response_time = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let healthy = status.is_success();

                if !healthy {
                    debug!("Endpoint {url} returned status {status}");
                }

                EndpointCheck {
                    url: url.to_string(),
                    healthy,
                    status_code: Some(status.as_u16()),
                    response_time_ms: Some(response_time),
                    error: if healthy {
                        None
                    } else {
                        Some(format!("HTTP {status}"))
                    },
                }
            }
            Err(e) => {
                debug!("Health check failed for {url}: {e}");

                EndpointCheck {
                    url: url.to_string(),
                    healthy: false,
                    status_code: None,
                    response_time_ms: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// URL of the backend health endpoint on loopback.
#[must_use]
pub fn health_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

/// Polls `url` until healthy or the attempt budget is spent.
///
/// # Errors
///
/// Returns [`DeployError::HealthCheckTimeout`] when every attempt failed.
pub async fn wait_until_healthy(
    probe: &dyn HealthProbe,
    url: &str,
    attempts: u32,
    interval: Duration,
) -> Result<HealthReport> {
    info!("Waiting for {url} to become healthy ({attempts} attempts, {}s apart)", interval.as_secs());

    for attempt in 1..=attempts {
        let check = probe.check(url).await;

        if check.healthy {
            info!(outcome = "success", "Health check passed on attempt {attempt}/{attempts}");
            return Ok(HealthReport {
                url: url.to_string(),
                attempts: attempt,
                last_check: check,
            });
        }

        let reason = check.error.as_deref().unwrap_or("unhealthy");
        debug!("Attempt {attempt}/{attempts} failed: {reason}");

        if attempt < attempts {
            tokio::time::sleep(interval).await;
        } else {
            warn!("Last health check attempt failed: {reason}");
        }
    }

    Err(DeployError::HealthCheckTimeout {
        url: url.to_string(),
        attempts,
        interval_secs: interval.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn unhealthy(url: &str) -> EndpointCheck {
        EndpointCheck {
            url: url.to_string(),
            healthy: false,
            status_code: None,
            response_time_ms: None,
            error: Some(String::from("connection refused")),
        }
    }

    #[test]
    fn test_health_url() {
        assert_eq!(health_url(8080, "/api/health"), "http://127.0.0.1:8080/api/health");
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_is_exact() {
        let mut probe = MockHealthProbe::new();
        probe.expect_check().times(5).returning(|url| unhealthy(url));

        let start = tokio::time::Instant::now();
        let err = wait_until_healthy(&probe, "http://127.0.0.1:1/h", 5, Duration::from_secs(2))
            .await
            .unwrap_err();

        // Four sleeps between five attempts, none after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(8));
        assert!(matches!(
            err,
            DeployError::HealthCheckTimeout { attempts: 5, interval_secs: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let mut probe = MockHealthProbe::new();
        probe.expect_check().times(3).returning(move |url| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 3 {
                EndpointCheck {
                    url: url.to_string(),
                    healthy: true,
                    status_code: Some(200),
                    response_time_ms: Some(1),
                    error: None,
                }
            } else {
                unhealthy(url)
            }
        });

        let report = wait_until_healthy(&probe, "http://x/h", 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_http_probe_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"status\":\"UP\"}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpHealthProbe::new(&HealthCheckConfig::default()).unwrap();

        let ok = probe.check(&format!("{}/api/health", server.uri())).await;
        assert!(ok.healthy);
        assert_eq!(ok.status_code, Some(200));

        let down = probe.check(&format!("{}/down", server.uri())).await;
        assert!(!down.healthy);
        assert_eq!(down.status_code, Some(503));
        assert_eq!(down.error.as_deref(), Some("HTTP 503 Service Unavailable"));
    }

    #[tokio::test]
    async fn test_http_probe_wait_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpHealthProbe::new(&HealthCheckConfig::default()).unwrap();
        let url = format!("{}/api/health", server.uri());
        let report = wait_until_healthy(&probe, &url, 3, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
    }
}
