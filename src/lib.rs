//! Health-check scheduling and alert routing
//!
//! Probes ([`probes`]) run on per-service schedules ([`actors::scheduler`]),
//! their results become [`model::HealthEvent`]s that the [`alerts`] engine
//! deduplicates, suppresses and rate-limits, and the resulting dispatches are
//! delivered through [`notify`] channels by [`actors::router`].
//! [`monitor::Monitor`] wires it all together.

pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod backoff;
pub mod config;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod probes;
pub mod storage;
pub mod util;

pub use monitor::{Monitor, Snapshot};
