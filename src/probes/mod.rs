//! Protocol probes
//!
//! A probe performs exactly one health check attempt against one target. The
//! scheduler only ever sees the [`Probe`] trait, so every kind (HTTP, TCP, DNS,
//! database ping or a registered custom check) is interchangeable.
//!
//! ## Contract
//!
//! - `Ok(Observation)` means the target answered; the observation may still be
//!   `degraded` or `unhealthy` (e.g. unexpected status code).
//! - `Err(ProbeFailure)` means the protocol exchange itself failed.
//!
//! Timeouts are enforced by the caller with [`tokio::time::timeout`], which drops
//! (and therefore cancels) the probe future. The `timeout` argument lets
//! transports size their own internal deadlines.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::HealthStatus;

#[cfg(feature = "db-probe")]
pub mod database;
pub mod dns;
pub mod http;
pub mod tcp;

/// Closed set of probe kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "name")]
pub enum ProbeKind {
    Http,
    Tcp,
    Dns,
    Database,
    Custom(String),
}

impl ProbeKind {
    pub fn name(&self) -> &str {
        match self {
            ProbeKind::Http => "http",
            ProbeKind::Tcp => "tcp",
            ProbeKind::Dns => "dns",
            ProbeKind::Database => "database",
            ProbeKind::Custom(name) => name,
        }
    }
}

/// What a probe saw when the target answered
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: HealthStatus,
    pub detail: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Observation {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_status(status: HealthStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Transport-level failure of a probe attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The attempt did not finish within its timeout
    Timeout(Duration),

    /// Connection refused or reset
    Connection(String),

    /// Name resolution failed
    Dns(String),

    /// TLS negotiation failed
    Tls(String),

    /// The peer answered something the protocol does not allow
    Protocol(String),

    /// Anything else (custom probes, driver errors)
    Other(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout(timeout) => write!(f, "timed out after {}ms", timeout.as_millis()),
            ProbeFailure::Connection(msg) => write!(f, "connection failed: {}", msg),
            ProbeFailure::Dns(msg) => write!(f, "dns resolution failed: {}", msg),
            ProbeFailure::Tls(msg) => write!(f, "tls error: {}", msg),
            ProbeFailure::Protocol(msg) => write!(f, "protocol error: {}", msg),
            ProbeFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ProbeFailure {}

/// One health check capability
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Observation, ProbeFailure>;
}

/// Lookup table for custom probes, consulted once while resolving the configuration
#[derive(Default, Clone)]
pub struct ProbeRegistry {
    custom: HashMap<String, Arc<dyn Probe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom probe; a later registration under the same name wins
    pub fn register(&mut self, name: impl Into<String>, probe: Arc<dyn Probe>) -> &mut Self {
        self.custom.insert(name.into(), probe);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Probe>> {
        self.custom.get(name).cloned()
    }
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeRegistry")
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Split `host:port`, tolerating a `scheme://` prefix and trailing path
pub(crate) fn host_and_port(target: &str, default_port: Option<u16>) -> Result<(String, u16), ProbeFailure> {
    let without_scheme = target.split_once("://").map_or(target, |(_, rest)| rest);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.ends_with(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProbeFailure::Protocol(format!("invalid port in target '{target}'")))?;
            Ok((host.trim_matches(['[', ']']).to_string(), port))
        }
        _ => match default_port {
            Some(port) => Ok((authority.trim_matches(['[', ']']).to_string(), port)),
            None => Err(ProbeFailure::Protocol(format!(
                "target '{target}' needs an explicit port"
            ))),
        },
    }
}
