//! # Choros - Session-Scoped Persona Worker Pools
//!
//! Choros (Χορός, "chorus") provides the worker-side building blocks for a
//! draft-room demo where every participant is an isolated persona worker
//! reachable over its own private port:
//! - Wire protocol types for decision/reaction calls with continuity tokens
//! - Structured response parsing with best-effort fallback extraction
//! - A deterministic strategy-driven persona engine
//! - The worker HTTP service (readiness probe + RPC endpoint)
//! - Configuration and a one-shot hosting capability probe
//!
//! The session-scoped pool management (port allocation, lifecycle, resilient
//! RPC, orchestration) lives in `choros-pool`.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod parsing;
pub mod persona;
pub mod protocol;
pub mod service;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::capabilities::Capabilities;
    pub use crate::config::{
        ChorosConfig, LifecycleConfig, PortConfig, PortRange, RpcConfig, WorkerConfig,
    };
    pub use crate::error::{ChorosError, Result};
    pub use crate::parsing::{ParsedReply, parse_reply};
    pub use crate::persona::{Persona, Strategy, StrategyPersona};
    pub use crate::protocol::{
        Payload, PickDecision, PickReaction, ReplyKind, WireRequest, WireResponse, WorkerReply,
    };
    pub use crate::service::{ConversationLog, WorkerService};
}
