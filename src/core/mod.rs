// src/core/mod.rs

//! The shared services behind the server and client: errors, statistics, the
//! connection pool, event fan-out, metrics and background tasks.

pub mod errors;
pub mod events;
pub mod metrics;
pub mod pool;
pub mod stats;
pub mod tasks;

pub use errors::{LineWireError, TransferError};
pub use events::{EventBus, EventReceivers};
pub use pool::ConnectionPool;
pub use stats::{StatKind, StatsAggregator};
pub use tasks::lifecycle::{LifecycleManager, SweepReport};
