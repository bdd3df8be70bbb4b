//! Alerting: rules, suppression, cooldowns and the evaluation engine

pub mod engine;
pub mod rate_limit;
pub mod rules;
pub mod store;
pub mod suppression;
pub mod template;

pub use engine::{AlertEngine, ChannelRoute, Dispatch, DispatchKind, EngineStatsSnapshot, Evaluation, Outcome};
pub use store::{Alert, AlertState, AlertStore};
