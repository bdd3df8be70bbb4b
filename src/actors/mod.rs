//! Actor-based monitoring pipeline
//!
//! Each actor runs as an independent async task and is driven through a
//! cloneable handle. Actors talk to each other over bounded Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ServiceMonitor-1 … ServiceMonitor-N        external signal sources
//!   (one per service, SchedulerHandle)         (Monitor::event_sender)
//!                 │                                      │
//!                 └──────────── HealthEvent ─────────────┘
//!                                  │ mpsc (bounded)
//!                          ┌───────▼────────┐
//!                          │   AlertActor   │──► StorageBackend (history)
//!                          │ N evaluators   │◄─► AlertStore (via AlertEngine)
//!                          └───────┬────────┘
//!                                  │ Dispatch, mpsc (bounded)
//!                          ┌───────▼────────┐
//!                          │  RouterActor   │──► email / chat / pager / webhook / log
//!                          └───────┬────────┘
//!                                  │ DeliveryReport, broadcast
//!                                  ▼
//!                              observers
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Pipeline**: Events and dispatches flow through bounded mpsc channels
//! 3. **Request/Response**: oneshot channels for synchronous queries and
//!    shutdown acknowledgements
//!
//! Shutdown runs front to back: the scheduler stops producing, the alert actor
//! evaluates what is queued, the router finishes accepted deliveries.

pub mod alert;
pub mod messages;
pub mod router;
pub mod scheduler;
