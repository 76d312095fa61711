//! End-to-end session tests: real workers on real ports.
//!
//! Each test uses its own port range so parallel test runs cannot collide.

use std::sync::Arc;
use std::time::Duration;

use choros_core::capabilities::Capabilities;
use choros_core::config::{ChorosConfig, PortRange, WorkerConfig};
use choros_core::persona::{Persona, Strategy, StrategyPersona};
use choros_pool::error::PoolError;
use choros_pool::orchestrator::TurnContext;
use choros_pool::session::SessionRegistry;
use choros_pool::worker::WorkerStatus;

fn test_config(range: PortRange) -> ChorosConfig {
    let mut config = ChorosConfig::default();
    config.ports.ranges = vec![range];
    config.lifecycle.stagger = Duration::from_millis(10);
    config.lifecycle.readiness_poll_interval = Duration::from_millis(50);
    config.lifecycle.readiness_max_attempts = 40;
    config.lifecycle.probe_timeout = Duration::from_secs(1);
    config.lifecycle.shutdown_grace = Duration::from_secs(2);
    config.lifecycle.port_free_poll_interval = Duration::from_millis(50);
    config.lifecycle.port_free_timeout = Duration::from_secs(2);
    config.rpc.connect_timeout = Duration::from_secs(1);
    config.rpc.request_timeout = Duration::from_secs(2);
    config.rpc.backoff_base = Duration::from_millis(50);
    config.rpc.backoff_jitter = false;
    config
}

fn test_roster() -> Vec<Arc<dyn Persona>> {
    vec![
        Arc::new(
            StrategyPersona::new("The Air Raid", Strategy::WideoutFirst)
                .with_rivals(["The Bulldozer"]),
        ),
        Arc::new(
            StrategyPersona::new("The Bulldozer", Strategy::GroundGame)
                .with_rivals(["The Air Raid"]),
        ),
    ]
}

fn registry(range: PortRange) -> SessionRegistry {
    let config = test_config(range);
    let capabilities = Capabilities::detect_from(&WorkerConfig::default(), |_| None);
    SessionRegistry::new(config, capabilities, test_roster())
}

fn board() -> TurnContext {
    TurnContext {
        candidates: vec![
            "A. Vance (WR)".to_string(),
            "R. Okafor (RB)".to_string(),
            "D. Whitfield (QB)".to_string(),
        ],
        roster: vec![],
        round: 1,
    }
}

#[tokio::test]
async fn test_open_decision_reaction_close() {
    let registry = registry(PortRange::new(49100, 49140));
    let session = registry.open().await.unwrap();

    assert_eq!(session.worker_ids(), vec![0, 1]);
    assert_eq!(session.ports().len(), 2);
    for id in session.worker_ids() {
        assert!(session.worker(id).unwrap().is_real());
        assert_eq!(session.worker_status(id).await, Some(WorkerStatus::Ready));
    }

    // Worker 0 is wideout-first: it takes the wideout
    let decision = session.request_decision(0, &board()).await.unwrap();
    assert_eq!(decision.player, "A. Vance");

    // Worker 1 is its rival: it always has something to say
    let reaction = session
        .request_reaction(1, "The Air Raid", &decision.player, 1)
        .await
        .unwrap();
    assert!(reaction.engaged);
    assert!(reaction.remark.unwrap().contains("A. Vance"));

    let ports: Vec<u16> = session.ports().to_vec();
    let id = session.id().to_string();
    registry.close(&id).await;
    assert!(session.is_closed());

    // Every port the session held is reservable again
    for port in ports {
        assert!(choros_pool::ports::probe_free(port));
    }
    assert!(registry.reservations().is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent_and_lookup_fails_after() {
    let registry = registry(PortRange::new(49150, 49190));
    let session = registry.open().await.unwrap();
    let id = session.id().to_string();

    assert!(registry.session(&id).await.is_ok());

    registry.close(&id).await;
    registry.close(&id).await;

    match registry.session(&id).await {
        Err(PoolError::SessionNotFound(missing)) => assert_eq!(missing, id),
        Err(other) => panic!("expected SessionNotFound, got {}", other),
        Ok(_) => panic!("closed session still resolvable"),
    }
}

#[tokio::test]
async fn test_unknown_session_id() {
    let registry = registry(PortRange::new(49195, 49199));
    assert!(matches!(
        registry.session("no-such-session").await,
        Err(PoolError::SessionNotFound(_))
    ));
    // Closing an unknown id is a no-op, not an error
    registry.close("no-such-session").await;
}

#[tokio::test]
async fn test_continuity_token_resets_at_threshold() {
    let range = PortRange::new(49200, 49240);
    let mut config = test_config(range);
    config.rpc.context_reset_threshold = 2;
    let capabilities = Capabilities::detect_from(&WorkerConfig::default(), |_| None);
    let registry = SessionRegistry::new(config, capabilities, test_roster());

    let session = registry.open().await.unwrap();
    let ctx = board();

    session.request_decision(0, &ctx).await.unwrap();
    let first = session.continuity_token(0).await.unwrap();

    // Second call stays within the threshold and keeps the conversation
    session.request_decision(0, &ctx).await.unwrap();
    let second = session.continuity_token(0).await.unwrap();
    assert_eq!(first, second);

    // Third call crosses the threshold: the request goes out with no token,
    // so the worker starts a fresh context and mints a new one
    session.request_decision(0, &ctx).await.unwrap();
    let third = session.continuity_token(0).await.unwrap();
    assert_ne!(first, third);

    registry.close(session.id()).await;
}

#[tokio::test]
async fn test_concurrent_sessions_get_disjoint_ports() {
    let range = PortRange::new(49300, 49400);
    let config = test_config(range);
    let capabilities = Capabilities::detect_from(&WorkerConfig::default(), |_| None);
    let registry = Arc::new(SessionRegistry::new(config, capabilities, test_roster()));

    let (a, b) = tokio::join!(registry.open(), registry.open());
    let a = a.unwrap();
    let b = b.unwrap();

    for port in a.ports() {
        assert!(!b.ports().contains(port), "port {} allocated twice", port);
    }

    registry.close_all().await;
    assert!(registry.reservations().is_empty());
}

#[tokio::test]
async fn test_restart_through_worker_status() {
    let registry = registry(PortRange::new(49410, 49450));
    let session = registry.open().await.unwrap();

    // A session survives many calls to the same worker in sequence
    for round in 1..=3 {
        let mut ctx = board();
        ctx.round = round;
        assert!(session.request_decision(1, &ctx).await.is_some());
    }
    assert_eq!(session.worker_status(1).await, Some(WorkerStatus::Ready));

    registry.close(session.id()).await;
}
