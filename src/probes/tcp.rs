//! TCP connect probe

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

use super::{Observation, Probe, ProbeFailure, host_and_port};

/// Healthy as soon as the three-way handshake completes
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Observation, ProbeFailure> {
        let (host, port) = host_and_port(target, None)?;
        trace!("connecting to {host}:{port}");

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| ProbeFailure::Timeout(timeout))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset => {
                    ProbeFailure::Connection(e.to_string())
                }
                _ if e.to_string().contains("lookup") => ProbeFailure::Dns(e.to_string()),
                _ => ProbeFailure::Connection(e.to_string()),
            })?;

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();

        Ok(Observation::healthy().with_metadata("peer", peer))
    }
}
