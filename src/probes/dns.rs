//! DNS resolution probe

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{Observation, Probe, ProbeFailure, host_and_port};
use crate::model::HealthStatus;

/// Resolves the target name through the system resolver
#[derive(Debug, Default, Clone)]
pub struct DnsProbe {
    /// At least one of these must be returned, if set
    expected_addresses: Option<Vec<IpAddr>>,
}

impl DnsProbe {
    pub fn new(expected_addresses: Option<Vec<IpAddr>>) -> Self {
        Self { expected_addresses }
    }

    fn evaluate(&self, addresses: &[IpAddr]) -> Observation {
        let listed = addresses
            .iter()
            .map(IpAddr::to_string)
            .collect::<Vec<_>>()
            .join(",");

        if let Some(expected) = &self.expected_addresses {
            if !addresses.iter().any(|addr| expected.contains(addr)) {
                return Observation::with_status(
                    HealthStatus::Unhealthy,
                    format!("none of the expected addresses resolved (got {listed})"),
                )
                .with_metadata("addresses", listed);
            }
        }

        Observation::healthy().with_metadata("addresses", listed)
    }
}

#[async_trait]
impl Probe for DnsProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Observation, ProbeFailure> {
        // lookup_host wants a socket address; the port is irrelevant here
        let (host, port) = host_and_port(target, Some(0))?;
        trace!("resolving {host}");

        let addresses = tokio::time::timeout(timeout, tokio::net::lookup_host((host.as_str(), port)))
            .await
            .map_err(|_| ProbeFailure::Timeout(timeout))?
            .map_err(|e| ProbeFailure::Dns(e.to_string()))?
            .map(|addr| addr.ip())
            .collect::<Vec<_>>();

        if addresses.is_empty() {
            return Err(ProbeFailure::Dns(format!("no records for '{host}'")));
        }

        Ok(self.evaluate(&addresses))
    }
}
