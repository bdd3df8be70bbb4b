//! Database ping probe
//!
//! Opens a fresh connection for every attempt (a pooled connection would hide
//! exactly the failures we are looking for) and issues a driver-level ping.
//! The target is a connection URL understood by `sqlx`'s `Any` driver, e.g.
//! `postgres://monitor@db:5432/app` or `sqlite://data/app.db`.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{AnyConnection, Connection};
use tracing::trace;

use super::{Observation, Probe, ProbeFailure};

static INSTALL_DRIVERS: Once = Once::new();

#[derive(Debug, Clone, Copy)]
pub struct DatabaseProbe;

impl DatabaseProbe {
    pub fn new() -> Self {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self
    }
}

fn classify(err: sqlx::Error) -> ProbeFailure {
    match err {
        sqlx::Error::Io(io) => ProbeFailure::Connection(io.to_string()),
        sqlx::Error::Tls(tls) => ProbeFailure::Tls(tls.to_string()),
        sqlx::Error::Protocol(msg) => ProbeFailure::Protocol(msg),
        sqlx::Error::Configuration(cfg) => ProbeFailure::Other(format!("invalid connection url: {cfg}")),
        other => ProbeFailure::Other(other.to_string()),
    }
}

#[async_trait]
impl Probe for DatabaseProbe {
    async fn probe(&self, target: &str, timeout: Duration) -> Result<Observation, ProbeFailure> {
        trace!("pinging database");

        let ping = async {
            let mut conn = AnyConnection::connect(target).await.map_err(classify)?;
            conn.ping().await.map_err(classify)?;
            let backend = conn.backend_name().to_string();
            conn.close().await.map_err(classify)?;
            Ok::<_, ProbeFailure>(backend)
        };

        let backend = tokio::time::timeout(timeout, ping)
            .await
            .map_err(|_| ProbeFailure::Timeout(timeout))??;

        Ok(Observation::healthy().with_metadata("backend", backend))
    }
}
