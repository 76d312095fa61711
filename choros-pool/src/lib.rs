//! # Choros Pool - Session-Scoped Worker Pool Manager
//!
//! Everything one user session needs to run a room of persona workers:
//! - **Port allocation** - consecutive windows from a shared reservation set,
//!   validated with live OS bind probes under one mutex
//! - **Worker lifecycle** - supervised run loops, staggered startup with
//!   readiness polling, individual restarts that wait for the port to free
//! - **Resilient RPC** - health-check-first calls with retry, exponential
//!   backoff, continuity-token context bounding, and a shared admission
//!   limiter
//! - **Orchestration** - decision/reaction operations that degrade to an
//!   absent result instead of erroring
//! - **Session registry** - open/close with guaranteed teardown order
//!
//! The worker-side service and persona engine live in `choros-core`.

pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod ports;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod worker;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{PoolError, Result};
    pub use crate::lifecycle::WorkerPool;
    pub use crate::orchestrator::{Orchestrator, TurnContext};
    pub use crate::ports::{PortAllocator, PortReservations};
    pub use crate::retry::BackoffPolicy;
    pub use crate::rpc::{CallProfile, RpcClient};
    pub use crate::session::{Session, SessionRegistry};
    pub use crate::worker::{WorkerHandle, WorkerRef, WorkerStatus};
}
