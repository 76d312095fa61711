//! Resilient RPC client
//!
//! Per-call failures never escape as errors: the client retries what is worth
//! retrying, repairs what looks repairable, and otherwise resolves to `None`
//! so the caller can substitute a local fallback and keep the session moving.
//!
//! Before every send the worker's health is checked through the pool. A
//! failed check with a free port means the listener is gone and a one-time
//! restart is attempted; a failed check with the port still bound is read as
//! "merely slow" and the call proceeds, which keeps a loaded pool from
//! spiraling into restart storms. That heuristic is environment-dependent and
//! everything feeding it is configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use choros_core::config::RpcConfig;
use choros_core::error::ChorosError;
use choros_core::parsing::parse_reply;
use choros_core::protocol::{Payload, WireRequest, WorkerReply};

use crate::error::{PoolError, Result};
use crate::lifecycle::WorkerPool;
use crate::ports::probe_free;
use crate::retry::BackoffPolicy;

/// How urgent a call is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallProfile {
    /// Full retry budget
    #[default]
    Standard,
    /// Latency-sensitive; a single attempt, fall back fast
    Interactive,
}

#[derive(Debug, Default)]
struct ChannelState {
    continuity_token: Option<String>,
    calls_since_reset: u32,
}

/// RPC client shared by all of a session's workers
pub struct RpcClient {
    http: reqwest::Client,
    config: RpcConfig,
    policy: BackoffPolicy,
    admission: Semaphore,
    pool: Arc<WorkerPool>,
    channels: Mutex<HashMap<usize, ChannelState>>,
}

impl RpcClient {
    /// Create a client over the given pool
    pub fn new(pool: Arc<WorkerPool>, config: RpcConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                ChorosError::Configuration(format!("Failed to create RPC client: {}", e))
            })?;

        Ok(Self {
            http,
            policy: BackoffPolicy::from_config(&config),
            admission: Semaphore::new(config.admission_permits),
            pool,
            channels: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Call a worker and parse its reply.
    ///
    /// `known_entities` feeds the last-resort extraction when a response is
    /// plain text instead of structured JSON. Returns `None` on exhausted
    /// retries, a malformed response, or an unusable worker.
    pub async fn call(
        &self,
        worker_id: usize,
        payload: &Payload,
        known_entities: &[String],
        profile: CallProfile,
    ) -> Option<WorkerReply> {
        // Admission is FIFO and shared across every worker in the pool
        let _permit = self.admission.acquire().await.ok()?;

        let port = self.ensure_usable(worker_id).await?;

        // Context bounding happens before the request is even constructed
        let token = {
            let mut channels = self.channels.lock().await;
            let state = channels.entry(worker_id).or_default();
            if state.calls_since_reset >= self.config.context_reset_threshold {
                debug!(worker_id, "context reset threshold reached; starting fresh");
                state.continuity_token = None;
                state.calls_since_reset = 0;
            }
            state.calls_since_reset += 1;
            state.continuity_token.clone()
        };

        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(worker_id, error = %e, "failed to encode payload");
                return None;
            }
        };
        let request = WireRequest {
            payload: body,
            continuity_token: token,
        };
        let url = format!("http://{}:{}/rpc", self.pool.callback_host(), port);
        let max_attempts = match profile {
            CallProfile::Standard => self.config.max_attempts,
            CallProfile::Interactive => self.config.interactive_max_attempts,
        };

        let pool = self.pool.clone();
        let raw = send_with_retry(
            &self.http,
            &url,
            &request,
            &self.policy,
            max_attempts,
            |attempt| {
                if attempt == 0 {
                    // Transient failure signature: kick off a restart in
                    // parallel with the first retry
                    let pool = pool.clone();
                    tokio::spawn(async move {
                        pool.restart(worker_id).await;
                    });
                }
            },
        )
        .await?;

        let parsed = match parse_reply(&raw, payload.expected_kind(), known_entities) {
            Some(parsed) => parsed,
            None => {
                warn!(worker_id, "response unparseable even with fallback extraction");
                return None;
            }
        };

        if let Some(new_token) = parsed.continuity_token {
            let mut channels = self.channels.lock().await;
            channels
                .entry(worker_id)
                .or_default()
                .continuity_token = Some(new_token);
        }

        Some(parsed.reply)
    }

    /// The continuity token currently held for a worker
    pub async fn continuity_token(&self, worker_id: usize) -> Option<String> {
        self.channels
            .lock()
            .await
            .get(&worker_id)
            .and_then(|state| state.continuity_token.clone())
    }

    /// Calls issued since the worker's last context reset
    pub async fn calls_since_reset(&self, worker_id: usize) -> u32 {
        self.channels
            .lock()
            .await
            .get(&worker_id)
            .map(|state| state.calls_since_reset)
            .unwrap_or(0)
    }

    /// Health-check-then-repair. Returns the worker's port when a call should
    /// proceed; `None` means the worker is unusable this turn.
    async fn ensure_usable(&self, worker_id: usize) -> Option<u16> {
        match self.pool.require_callable(worker_id).await {
            Ok(port) => {
                if self.pool.health_check(worker_id).await {
                    return Some(port);
                }
                if probe_free(port) {
                    // The listener is gone, not merely slow: one-shot repair
                    debug!(worker_id, "health check failed and port is free; restarting");
                    if self.pool.restart(worker_id).await {
                        self.pool.worker_port(worker_id).await
                    } else {
                        None
                    }
                } else {
                    // Still bound: assume slow and proceed rather than pile
                    // restarts onto a loaded worker
                    debug!(worker_id, "health check failed but port still bound; proceeding");
                    Some(port)
                }
            }
            Err(PoolError::WorkerCrashed(_)) => {
                warn!(worker_id, "worker crashed; attempting restart before call");
                if self.pool.restart(worker_id).await {
                    self.pool.worker_port(worker_id).await
                } else {
                    None
                }
            }
            Err(e) => {
                debug!(worker_id, error = %e, "worker not callable");
                None
            }
        }
    }
}

/// POST a request, retrying timeout-class and transient-class failures with
/// exponential backoff. `on_transient` fires after each retryable failure
/// with the 0-indexed attempt number.
pub(crate) async fn send_with_retry(
    http: &reqwest::Client,
    url: &str,
    request: &WireRequest,
    policy: &BackoffPolicy,
    max_attempts: u32,
    mut on_transient: impl FnMut(u32),
) -> Option<String> {
    for attempt in 0..max_attempts {
        match http.post(url).json(request).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.text().await {
                        Ok(text) => return Some(text),
                        Err(e) => {
                            warn!(url, error = %e, "failed reading response body");
                            return None;
                        }
                    }
                }
                if !policy.is_transient_status(status.as_u16()) {
                    warn!(url, %status, "non-retryable response status");
                    return None;
                }
                debug!(url, %status, attempt, "transient response status");
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                debug!(url, error = %e, attempt, "timeout-class failure");
            }
            Err(e) => {
                warn!(url, error = %e, "non-retryable transport failure");
                return None;
            }
        }

        on_transient(attempt);
        if attempt + 1 < max_attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
        }
    }

    warn!(url, max_attempts, "retry attempts exhausted");
    None
}
