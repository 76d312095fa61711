//! Session registry
//!
//! A session is the unit of resource ownership: one port window plus one
//! worker pool, created together and destroyed together. The registry hands
//! out sessions, tracks them by id, and guarantees teardown order — workers
//! are stopped before their ports are released, never the other way around.
//! A session abandoned without a close dies with the process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use choros_core::capabilities::Capabilities;
use choros_core::config::ChorosConfig;
use choros_core::persona::Persona;
use choros_core::protocol::{PickDecision, PickReaction};

use crate::error::{PoolError, Result};
use crate::lifecycle::WorkerPool;
use crate::orchestrator::{Orchestrator, TurnContext};
use crate::ports::{PortAllocator, PortReservations};
use crate::rpc::RpcClient;
use crate::worker::{WorkerRef, WorkerStatus};

/// One user session's worker pool and port window
pub struct Session {
    id: String,
    ports: Vec<u16>,
    workers: HashMap<usize, WorkerRef>,
    pool: Arc<WorkerPool>,
    orchestrator: Orchestrator,
    allocator: PortAllocator,
    closed: AtomicBool,
}

impl Session {
    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ports held by this session
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Worker ids, ascending
    pub fn worker_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The session's view of one worker
    pub fn worker(&self, worker_id: usize) -> Option<&WorkerRef> {
        self.workers.get(&worker_id)
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Ask a worker for a pick; `None` means use a local fallback.
    pub async fn request_decision(
        &self,
        worker_id: usize,
        ctx: &TurnContext,
    ) -> Option<PickDecision> {
        if self.is_closed() {
            return None;
        }
        match self.workers.get(&worker_id) {
            Some(WorkerRef::Real(_)) => self.orchestrator.request_decision(worker_id, ctx).await,
            Some(WorkerRef::Fallback { reason }) => {
                debug!(worker_id, reason = %reason, "fallback worker; local decision expected");
                None
            }
            None => None,
        }
    }

    /// Ask a worker to react to another worker's pick.
    pub async fn request_reaction(
        &self,
        worker_id: usize,
        subject: &str,
        player: &str,
        round: u32,
    ) -> Option<PickReaction> {
        if self.is_closed() {
            return None;
        }
        match self.workers.get(&worker_id) {
            Some(WorkerRef::Real(_)) => {
                self.orchestrator
                    .request_reaction(worker_id, subject, player, round)
                    .await
            }
            _ => None,
        }
    }

    /// Current lifecycle status of a worker
    pub async fn worker_status(&self, worker_id: usize) -> Option<WorkerStatus> {
        self.pool.worker_status(worker_id).await
    }

    /// Continuity token currently held for a worker
    pub async fn continuity_token(&self, worker_id: usize) -> Option<String> {
        self.orchestrator.rpc().continuity_token(worker_id).await
    }

    /// Stop workers, then release ports. Safe to call more than once; any RPC
    /// call in flight is abandoned rather than awaited.
    pub(crate) async fn close_internal(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.id, "closing session");
        self.pool.stop_all().await;
        self.allocator.release(&self.ports);
    }
}

/// Creates sessions and owns their lifetimes
pub struct SessionRegistry {
    config: ChorosConfig,
    capabilities: Capabilities,
    roster: Vec<Arc<dyn Persona>>,
    reservations: Arc<PortReservations>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create a registry with its own reservation set
    pub fn new(
        config: ChorosConfig,
        capabilities: Capabilities,
        roster: Vec<Arc<dyn Persona>>,
    ) -> Self {
        Self::with_reservations(config, capabilities, roster, Arc::new(PortReservations::new()))
    }

    /// Create a registry sharing an existing reservation set
    pub fn with_reservations(
        config: ChorosConfig,
        capabilities: Capabilities,
        roster: Vec<Arc<dyn Persona>>,
        reservations: Arc<PortReservations>,
    ) -> Self {
        Self {
            config,
            capabilities,
            roster,
            reservations,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The shared reservation set
    pub fn reservations(&self) -> Arc<PortReservations> {
        self.reservations.clone()
    }

    /// Open a session: reserve one port per persona, start the workers, and
    /// return once every start has been issued. Workers that failed to start
    /// are present as [`WorkerRef::Fallback`]; readiness of the rest is
    /// re-checked lazily on first call.
    ///
    /// # Errors
    ///
    /// Port exhaustion is fatal to session creation and surfaces here.
    pub async fn open(&self) -> Result<Arc<Session>> {
        let id = Uuid::new_v4().to_string();
        info!(session_id = %id, workers = self.roster.len(), "opening session");

        let allocator = PortAllocator::new(
            self.reservations.clone(),
            self.config.ports.ranges.clone(),
        );
        let ports = allocator.reserve(self.roster.len())?;

        let pool = match WorkerPool::new(
            self.config.lifecycle.clone(),
            self.config.worker.clone(),
            self.capabilities.clone(),
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                allocator.release(&ports);
                return Err(e);
            }
        };
        let rpc = match RpcClient::new(pool.clone(), self.config.rpc.clone()) {
            Ok(rpc) => Arc::new(rpc),
            Err(e) => {
                allocator.release(&ports);
                return Err(e);
            }
        };

        // Issue all starts concurrently, staggered to bound the startup spike
        let mut tasks = Vec::new();
        for (worker_id, persona) in self.roster.iter().cloned().enumerate() {
            let pool = pool.clone();
            let port = ports[worker_id];
            let stagger = self.config.lifecycle.stagger;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(stagger * worker_id as u32).await;
                (worker_id, pool.start(worker_id, port, persona).await)
            }));
        }

        let mut workers = HashMap::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok((worker_id, Ok(handle))) => {
                    workers.insert(worker_id, WorkerRef::Real(handle));
                }
                Ok((worker_id, Err(e))) => {
                    warn!(worker_id, error = %e, "worker failed to start; session degraded");
                    workers.insert(
                        worker_id,
                        WorkerRef::Fallback {
                            reason: e.to_string(),
                        },
                    );
                }
                Err(e) => {
                    warn!(error = %e, "worker start task failed");
                }
            }
        }

        let session = Arc::new(Session {
            id: id.clone(),
            ports,
            workers,
            pool,
            orchestrator: Orchestrator::new(rpc),
            allocator,
            closed: AtomicBool::new(false),
        });
        self.sessions.lock().await.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a live session.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SessionNotFound`] for unknown or closed ids.
    pub async fn session(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PoolError::SessionNotFound(id.to_string()))
    }

    /// Close a session: stop its workers, then release its ports.
    ///
    /// Idempotent — closing an unknown or already-closed id is a no-op.
    pub async fn close(&self, id: &str) {
        let session = self.sessions.lock().await.remove(id);
        if let Some(session) = session {
            session.close_internal().await;
        }
    }

    /// Close every live session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close_internal().await;
        }
    }
}
