//! Result history storage
//!
//! The snapshot API reads the latest results per service and a short history
//! through the narrow [`StorageBackend`] trait, so the pipeline never depends on
//! a particular persistence engine.
//!
//! ## Backends
//!
//! - **In-Memory** (default): bounded ring buffer per service, no persistence

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{BackendHealth, StorageBackend, StorageStats, UptimeStats};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
