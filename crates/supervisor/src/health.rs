// Health prober
//
// Polls the engine's health endpoint at a fixed interval until it reports
// ready or the budget runs out. Connection refused is the normal state while
// the engine boots, so individual probe failures are logged and swallowed.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use coldstart_core::{HealthConfig, SupervisorError};
use serde_json::Value;
use tracing::{debug, info};

/// Decides whether a health response means "usable"
///
/// Status must be 200. If the body is a JSON object carrying the ready
/// field, its value must be one of the accepted sentinels. Non-JSON bodies
/// and objects without the field are accepted on status alone.
#[derive(Debug, Clone)]
pub struct ReadinessPredicate {
    field: String,
    accepted: Vec<String>,
}

impl Default for ReadinessPredicate {
    fn default() -> Self {
        Self::new("status", ["ok", "ready"])
    }
}

impl ReadinessPredicate {
    pub fn new<I, S>(field: impl Into<String>, accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field: field.into(),
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_ready(&self, status: u16, body: &str) -> bool {
        if status != 200 {
            return false;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => match map.get(&self.field) {
                Some(Value::String(value)) => self
                    .accepted
                    .iter()
                    .any(|accepted| accepted.eq_ignore_ascii_case(value)),
                Some(Value::Bool(value)) => *value,
                Some(_) => false,
                None => true,
            },
            _ => true,
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub succeeded: bool,
    pub status_code: Option<u16>,
    pub body: Option<String>,
    /// Transport error, if the request did not complete
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Summary of a successful wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// Number of probes issued, including the successful one
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Polls a health endpoint until ready
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    interval: Duration,
    probe_timeout: Duration,
    predicate: ReadinessPredicate,
}

impl HealthProber {
    pub fn new(
        interval: Duration,
        probe_timeout: Duration,
        predicate: ReadinessPredicate,
    ) -> Self {
        Self {
            client: crate::local_client(),
            interval,
            probe_timeout,
            predicate,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(
            config.interval,
            config.probe_timeout,
            ReadinessPredicate::new(config.ready_field.clone(), config.ready_values.clone()),
        )
    }

    /// Issue a single probe; never fails
    pub async fn probe(&self, endpoint: &str, timeout: Duration) -> HealthCheckResult {
        let response = self.client.get(endpoint).timeout(timeout).send().await;

        let (status_code, body, error) = match response {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.text().await {
                    Ok(text) => (Some(status), Some(text), None),
                    Err(e) => (Some(status), None, Some(e.to_string())),
                }
            }
            Err(e) => (None, None, Some(e.to_string())),
        };

        let succeeded = match (status_code, &body) {
            (Some(status), Some(body)) => self.predicate.is_ready(status, body),
            _ => false,
        };

        HealthCheckResult {
            succeeded,
            status_code,
            body,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Poll `endpoint` until ready or until `budget` has elapsed
    ///
    /// Fails with [`SupervisorError::HealthTimeout`] carrying the number of
    /// probes actually issued. A probe still in flight at the deadline is
    /// bounded by the remaining budget and then ignored.
    pub async fn wait_until_healthy(
        &self,
        endpoint: &str,
        budget: Duration,
    ) -> Result<HealthReport, SupervisorError> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        info!(endpoint = %endpoint, budget = ?budget, "Waiting for engine to become healthy");

        loop {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(SupervisorError::HealthTimeout {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }

            attempts += 1;
            let result = self.probe(endpoint, self.probe_timeout.min(remaining)).await;

            if result.succeeded {
                let report = HealthReport {
                    attempts,
                    elapsed: started.elapsed(),
                };
                info!(
                    attempts = report.attempts,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Engine is healthy"
                );
                return Ok(report);
            }

            debug!(
                attempt = attempts,
                status = ?result.status_code,
                error = result.error.as_deref().unwrap_or(""),
                "Engine not ready yet"
            );

            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(SupervisorError::HealthTimeout {
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
