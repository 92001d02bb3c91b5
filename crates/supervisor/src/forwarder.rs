// Request forwarder
//
// Sends one request to the engine's candidate routes in priority order. The
// first HTTP 200 wins; every other outcome is recorded and the next route is
// tried. Exhausting the list is a value, not an error.

use std::time::Duration;

use coldstart_core::{ServiceState, SupervisorConfig, SupervisorError};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// A request to deliver to the first accepting route
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Candidate paths, highest priority first
    pub routes: Vec<String>,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl ForwardRequest {
    /// JSON POST to `routes`
    pub fn post_json(routes: Vec<String>, body: Value) -> Self {
        Self {
            routes,
            method: Method::POST,
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response from the route that accepted the request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardResponse {
    pub route: String,
    pub status: u16,
    /// Parsed JSON, or the raw text as a string when the body is not JSON
    pub body: Value,
}

/// One rejected route
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteAttempt {
    pub route: String,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl RouteAttempt {
    fn describe(&self) -> String {
        match (&self.status, &self.error) {
            (Some(status), _) => format!("{} -> HTTP {status}", self.route),
            (None, Some(error)) => format!("{} -> {error}", self.route),
            (None, None) => format!("{} -> no response", self.route),
        }
    }
}

/// Result of trying every candidate route
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardOutcome {
    Delivered(ForwardResponse),
    AllRoutesFailed(Vec<RouteAttempt>),
}

impl ForwardOutcome {
    /// Collapse into a result, summarising every failed attempt
    pub fn into_result(self) -> Result<ForwardResponse, SupervisorError> {
        match self {
            ForwardOutcome::Delivered(response) => Ok(response),
            ForwardOutcome::AllRoutesFailed(attempts) => {
                let summary: Vec<String> = attempts.iter().map(RouteAttempt::describe).collect();
                Err(SupervisorError::forward(format!(
                    "all routes failed: {}",
                    summary.join("; ")
                )))
            }
        }
    }
}

/// Delivers requests to the engine's local port
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl RequestForwarder {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: crate::local_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.engine.base_url(), config.forward.request_timeout)
    }

    /// Try each route in order; only valid while the engine is Ready
    pub async fn forward(
        &self,
        state: ServiceState,
        request: &ForwardRequest,
    ) -> Result<ForwardOutcome, SupervisorError> {
        if state != ServiceState::Ready {
            return Err(SupervisorError::forward(format!(
                "engine is not ready (state: {state})"
            )));
        }

        let mut attempts = Vec::with_capacity(request.routes.len());

        for route in &request.routes {
            let url = format!("{}{}", self.base_url, route);
            debug!(url = %url, method = %request.method, "Forwarding request");

            let mut builder = self
                .client
                .request(request.method.clone(), &url)
                .timeout(self.timeout)
                .json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(route = %route, error = %e, "Route unreachable, trying next");
                    attempts.push(RouteAttempt {
                        route: route.clone(),
                        status: None,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status != 200 {
                warn!(route = %route, status, "Route rejected request, trying next");
                attempts.push(RouteAttempt {
                    route: route.clone(),
                    status: Some(status),
                    error: None,
                });
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(route = %route, error = %e, "Failed to read response body, trying next");
                    attempts.push(RouteAttempt {
                        route: route.clone(),
                        status: Some(status),
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            info!(route = %route, status, "Request delivered");
            return Ok(ForwardOutcome::Delivered(ForwardResponse {
                route: route.clone(),
                status,
                body: parse_body(text),
            }));
        }

        warn!(attempts = attempts.len(), "All candidate routes failed");
        Ok(ForwardOutcome::AllRoutesFailed(attempts))
    }
}

fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
