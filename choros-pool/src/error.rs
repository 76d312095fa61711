//! Error types for pool operations
//!
//! Provisioning failures are surfaced as errors; per-call failures are not
//! (they resolve to an absent result so callers can fall back locally).

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Error types for the worker pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// No candidate range yields a free window of the required size
    #[error("no free window of {count} consecutive ports in any candidate range")]
    PortExhaustion {
        /// Window size that was requested
        count: usize,
    },

    /// Operation against an unknown or closed session
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A worker's service could not be spawned
    #[error("worker {worker_id} failed to start: {reason}")]
    WorkerStartup {
        /// Worker that failed
        worker_id: usize,
        /// What went wrong
        reason: String,
    },

    /// A worker's run loop died; it is unusable until restarted
    #[error("worker {0} crashed")]
    WorkerCrashed(usize),

    /// A worker is stopped and will not be restarted
    #[error("worker {0} is stopped")]
    WorkerStopped(usize),

    /// No such worker in the pool
    #[error("unknown worker: {0}")]
    UnknownWorker(usize),

    #[error(transparent)]
    Core(#[from] choros_core::error::ChorosError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
