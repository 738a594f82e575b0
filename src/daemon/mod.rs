//! Daemon subsystem: cycle orchestration, resource-group scheduling, signal
//! handling, and the metrics/heartbeat subscribers.

pub mod cycle;
pub mod heartbeat;
pub mod metrics;
pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;
