//! Request orchestration
//!
//! The two caller-facing operations are thin payload builders over the RPC
//! client. Both resolve to `None` instead of erroring when a worker cannot
//! answer; the caller substitutes its own local fallback for that turn.

use std::sync::Arc;

use tracing::debug;

use choros_core::protocol::{Payload, PickDecision, PickReaction, WorkerReply, entity_name};

use crate::rpc::{CallProfile, RpcClient};

/// What the caller knows when asking for a decision
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    /// Available candidates, formatted `Name (POS)`
    pub candidates: Vec<String>,
    /// Names the worker has already picked
    pub roster: Vec<String>,
    /// Current round
    pub round: u32,
}

/// Facade over the RPC client for domain-shaped calls
pub struct Orchestrator {
    rpc: Arc<RpcClient>,
}

impl Orchestrator {
    /// Create an orchestrator over a client
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// The underlying RPC client
    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// Ask a worker for a pick.
    pub async fn request_decision(
        &self,
        worker_id: usize,
        ctx: &TurnContext,
    ) -> Option<PickDecision> {
        let payload = Payload::Decision {
            candidates: ctx.candidates.clone(),
            roster: ctx.roster.clone(),
            round: ctx.round,
        };
        let known: Vec<String> = ctx
            .candidates
            .iter()
            .map(|c| entity_name(c).to_string())
            .collect();

        match self
            .rpc
            .call(worker_id, &payload, &known, CallProfile::Standard)
            .await
        {
            Some(WorkerReply::Decision(decision)) => Some(decision),
            _ => {
                debug!(worker_id, "no decision from worker; caller falls back");
                None
            }
        }
    }

    /// Ask a worker to react to another worker's pick. Reactions are
    /// latency-sensitive color, not load-bearing, so they get one attempt.
    pub async fn request_reaction(
        &self,
        worker_id: usize,
        subject: &str,
        player: &str,
        round: u32,
    ) -> Option<PickReaction> {
        let payload = Payload::Reaction {
            subject: subject.to_string(),
            player: player.to_string(),
            round,
        };
        let known = vec![player.to_string()];

        match self
            .rpc
            .call(worker_id, &payload, &known, CallProfile::Interactive)
            .await
        {
            Some(WorkerReply::Reaction(reaction)) => Some(reaction),
            _ => {
                debug!(worker_id, "no reaction from worker");
                None
            }
        }
    }
}
