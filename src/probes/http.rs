//! HTTP/HTTPS probe
//!
//! Checks:
//! 1. Status code matches the expected codes (or is 2xx if not specified)
//! 2. Body matches the pattern (if configured)
//!
//! A status mismatch makes the target `unhealthy`, a body mismatch only `degraded`.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use super::{Observation, Probe, ProbeFailure};
use crate::model::HealthStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Head,
}

/// Probe issuing one request per attempt
pub struct HttpProbe {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
    method: HttpMethod,
    expected_status: Option<Vec<u16>>,
    body_pattern: Option<Regex>,
}

impl HttpProbe {
    pub fn new(method: HttpMethod, expected_status: Option<Vec<u16>>, body_pattern: Option<Regex>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("health-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            method,
            expected_status,
            body_pattern,
        }
    }

    fn evaluate_response(&self, status_code: u16, body: &str) -> Observation {
        let status_ok = match &self.expected_status {
            Some(expected) => expected.contains(&status_code),
            None => (200..300).contains(&status_code),
        };

        if !status_ok {
            return Observation::with_status(
                HealthStatus::Unhealthy,
                format!("unexpected status code: {status_code}"),
            )
            .with_metadata("status_code", status_code);
        }

        if let Some(pattern) = &self.body_pattern {
            if !pattern.is_match(body) {
                return Observation::with_status(
                    HealthStatus::Degraded,
                    format!("response body does not match '{}'", pattern.as_str()),
                )
                .with_metadata("status_code", status_code);
            }
        }

        Observation::healthy().with_metadata("status_code", status_code)
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ProbeFailure {
    if err.is_timeout() {
        return ProbeFailure::Timeout(timeout);
    }

    // reqwest's Display omits the source chain
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(inner) = source {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        source = inner.source();
    }

    let lowered = chain.to_lowercase();
    if lowered.contains("dns") || lowered.contains("failed to lookup") {
        ProbeFailure::Dns(chain)
    } else if lowered.contains("certificate") || lowered.contains("tls") {
        ProbeFailure::Tls(chain)
    } else if err.is_connect() {
        ProbeFailure::Connection(chain)
    } else {
        ProbeFailure::Protocol(chain)
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Observation, ProbeFailure> {
        trace!("requesting {target}");

        let method = match self.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        };

        let response = self
            .client
            .request(method, target)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status_code = response.status().as_u16();

        // Skip the body for HEAD requests
        let body = if matches!(self.method, HttpMethod::Head) {
            String::new()
        } else {
            response.text().await.map_err(|e| classify(e, timeout))?
        };

        Ok(self.evaluate_response(status_code, &body))
    }
}
