//! Worker handles and references

use std::sync::{Arc, RwLock};

/// Lifecycle status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Spawned, not yet confirmed reachable
    Starting,
    /// Passed its readiness probe
    Ready,
    /// Run loop died; unusable until restarted
    Crashed,
    /// Deliberately stopped
    Stopped,
}

/// Handle to a running worker.
///
/// Status is shared with the lifecycle manager's supervisor task, which is
/// the only writer; everyone else observes.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    worker_id: usize,
    port: u16,
    status: Arc<RwLock<WorkerStatus>>,
}

impl WorkerHandle {
    pub(crate) fn new(worker_id: usize, port: u16) -> Self {
        Self {
            worker_id,
            port,
            status: Arc::new(RwLock::new(WorkerStatus::Starting)),
        }
    }

    /// Worker id
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Port the worker is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current status snapshot
    pub fn status(&self) -> WorkerStatus {
        *self
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_status(&self, status: WorkerStatus) {
        *self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }
}

/// A session's view of one of its workers.
///
/// A worker that never came up is represented explicitly instead of with a
/// placeholder string, so downstream code pattern-matches rather than
/// sniffing prefixes.
#[derive(Debug, Clone)]
pub enum WorkerRef {
    /// A live (or at least spawned) worker
    Real(WorkerHandle),
    /// A worker that could not be provisioned; calls resolve to the caller's
    /// local fallback
    Fallback {
        /// Why the worker is unavailable
        reason: String,
    },
}

impl WorkerRef {
    /// Whether this reference points at a spawned worker
    pub fn is_real(&self) -> bool {
        matches!(self, WorkerRef::Real(_))
    }

    /// The underlying handle, when real
    pub fn handle(&self) -> Option<&WorkerHandle> {
        match self {
            WorkerRef::Real(handle) => Some(handle),
            WorkerRef::Fallback { .. } => None,
        }
    }
}
