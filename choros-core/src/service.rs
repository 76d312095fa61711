//! Worker HTTP service
//!
//! Each worker is a small axum app bound to its session-allocated port:
//! `GET /health` answers the readiness probe, `POST /rpc` routes a payload
//! through the persona engine. Conversation state is keyed by continuity
//! token; presenting no token (or an unknown one) starts a fresh context,
//! which is how the pool bounds a long session's memory growth.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::persona::Persona;
use crate::protocol::{Payload, ReplyKind, WireRequest, WireResponse};

/// One routed request, as remembered by the worker
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Round the exchange happened in
    pub round: u32,
    /// What kind of reply was produced
    pub kind: ReplyKind,
    /// The pick made, or the worker reacted to
    pub subject: String,
}

/// Bounded per-conversation memory
#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: VecDeque<Exchange>,
    cap: usize,
}

impl ConversationLog {
    /// Create a log holding at most `cap` exchanges
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(16)),
            cap,
        }
    }

    /// Append an exchange, evicting the oldest at capacity
    pub fn push(&mut self, exchange: Exchange) {
        if self.cap > 0 && self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(exchange);
    }

    /// Number of retained exchanges
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate retained exchanges, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }
}

/// A persona worker's HTTP service
pub struct WorkerService {
    worker_id: usize,
    persona: Arc<dyn Persona>,
    conversations: Mutex<HashMap<String, ConversationLog>>,
    max_log_entries: usize,
    max_conversations: usize,
}

impl WorkerService {
    /// Create a service for one worker
    pub fn new(worker_id: usize, persona: Arc<dyn Persona>, config: &WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            worker_id,
            persona,
            conversations: Mutex::new(HashMap::new()),
            max_log_entries: config.max_log_entries,
            max_conversations: config.max_conversations,
        })
    }

    /// Worker id served by this service
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Display name of the persona behind this service
    pub fn persona_name(&self) -> &str {
        self.persona.name()
    }

    /// Build the axum router
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/rpc", post(rpc))
            .with_state(self.clone())
    }

    /// Serve until cancelled. The run loop exits cleanly on cancellation and
    /// with an error if the server itself fails; the pool's supervisor uses
    /// that distinction to tell a stop from a crash.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    }
}

async fn health(State(service): State<Arc<WorkerService>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "worker_id": service.worker_id,
    }))
}

async fn rpc(
    State(service): State<Arc<WorkerService>>,
    Json(request): Json<WireRequest>,
) -> Result<Json<WireResponse>, StatusCode> {
    let payload: Payload =
        serde_json::from_str(&request.payload).map_err(|_| StatusCode::BAD_REQUEST)?;

    let mut conversations = service.conversations.lock().await;
    let token = match request.continuity_token {
        Some(token) if conversations.contains_key(&token) => token,
        _ => {
            if conversations.len() >= service.max_conversations {
                debug!(
                    worker_id = service.worker_id,
                    "conversation table full, clearing"
                );
                conversations.clear();
            }
            let token = Uuid::new_v4().to_string();
            conversations.insert(token.clone(), ConversationLog::new(service.max_log_entries));
            token
        }
    };

    let log = conversations
        .get_mut(&token)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let response = match payload {
        Payload::Decision {
            candidates,
            roster,
            round,
        } => {
            let decision = service.persona.decide(&candidates, &roster, round, log);
            log.push(Exchange {
                round,
                kind: ReplyKind::Decision,
                subject: decision.player.clone(),
            });
            WireResponse::decision(decision, token)
        }
        Payload::Reaction {
            subject,
            player,
            round,
        } => {
            let reaction = service.persona.react(&subject, &player, round, log);
            log.push(Exchange {
                round,
                kind: ReplyKind::Reaction,
                subject,
            });
            WireResponse::reaction(reaction, token)
        }
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::{Strategy, StrategyPersona};

    fn test_service() -> Arc<WorkerService> {
        WorkerService::new(
            3,
            Arc::new(StrategyPersona::new("The Air Raid", Strategy::WideoutFirst)),
            &WorkerConfig::default(),
        )
    }

    async fn spawn_service(
        service: Arc<WorkerService>,
    ) -> (String, CancellationToken, tokio::task::JoinHandle<std::io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(service.run(listener, cancel.clone()));
        (format!("http://127.0.0.1:{}", addr.port()), cancel, handle)
    }

    fn decision_request(token: Option<String>) -> WireRequest {
        let payload = Payload::Decision {
            candidates: vec!["A. Vance (WR)".to_string(), "R. Okafor (RB)".to_string()],
            roster: vec![],
            round: 1,
        };
        WireRequest {
            payload: serde_json::to_string(&payload).unwrap(),
            continuity_token: token,
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (base, cancel, handle) = spawn_service(test_service()).await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["worker_id"], 3);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rpc_decision_and_continuity() {
        let (base, cancel, handle) = spawn_service(test_service()).await;
        let client = reqwest::Client::new();

        let first: WireResponse = client
            .post(format!("{}/rpc", base))
            .json(&decision_request(None))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(first.player.as_deref(), Some("A. Vance"));
        let token = first.continuity_token.clone().unwrap();

        // Presenting the token continues the same conversation
        let second: WireResponse = client
            .post(format!("{}/rpc", base))
            .json(&decision_request(Some(token.clone())))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second.continuity_token.as_deref(), Some(token.as_str()));

        // No token starts a fresh context with a fresh token
        let third: WireResponse = client
            .post(format!("{}/rpc", base))
            .json(&decision_request(None))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_ne!(third.continuity_token, Some(token));

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rpc_rejects_garbled_payload() {
        let (base, cancel, handle) = spawn_service(test_service()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/rpc", base))
            .json(&WireRequest {
                payload: "not a payload".to_string(),
                continuity_token: None,
            })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[test]
    fn test_conversation_log_eviction() {
        let mut log = ConversationLog::new(2);
        for round in 0..4 {
            log.push(Exchange {
                round,
                kind: ReplyKind::Decision,
                subject: format!("pick-{}", round),
            });
        }
        assert_eq!(log.len(), 2);
        let rounds: Vec<u32> = log.entries().map(|e| e.round).collect();
        assert_eq!(rounds, vec![2, 3]);
    }
}
