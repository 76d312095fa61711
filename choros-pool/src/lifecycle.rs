//! Worker lifecycle management
//!
//! The pool owns one session's workers: it binds their listeners, supervises
//! their run loops, polls readiness, restarts individual workers, and tears
//! everything down on close. Status transitions happen here and nowhere else;
//! the RPC layer only ever asks the pool to check or repair a worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use choros_core::capabilities::Capabilities;
use choros_core::config::{LifecycleConfig, WorkerConfig};
use choros_core::error::ChorosError;
use choros_core::persona::Persona;
use choros_core::service::WorkerService;

use crate::error::{PoolError, Result};
use crate::ports::wait_until_free;
use crate::worker::{WorkerHandle, WorkerStatus};

struct WorkerEntry {
    handle: WorkerHandle,
    persona: Arc<dyn Persona>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// One session's pool of supervised workers
pub struct WorkerPool {
    lifecycle: LifecycleConfig,
    worker_config: WorkerConfig,
    capabilities: Capabilities,
    probe_client: reqwest::Client,
    cancel_root: CancellationToken,
    workers: RwLock<HashMap<usize, WorkerEntry>>,
}

impl WorkerPool {
    /// Create an empty pool
    pub fn new(
        lifecycle: LifecycleConfig,
        worker_config: WorkerConfig,
        capabilities: Capabilities,
    ) -> Result<Self> {
        let probe_client = reqwest::Client::builder()
            .connect_timeout(lifecycle.probe_timeout)
            .timeout(lifecycle.probe_timeout)
            .build()
            .map_err(|e| {
                ChorosError::Configuration(format!("Failed to create probe client: {}", e))
            })?;

        Ok(Self {
            lifecycle,
            worker_config,
            capabilities,
            probe_client,
            cancel_root: CancellationToken::new(),
            workers: RwLock::new(HashMap::new()),
        })
    }

    /// Start a worker on its allocated port and poll it to readiness.
    ///
    /// The listener is bound up front, so a spawn failure surfaces as
    /// [`PoolError::WorkerStartup`] instead of a probe timeout later. A
    /// worker that never answers its readiness probe is left in `Starting`
    /// rather than torn down; callers decide whether to proceed degraded.
    pub async fn start(
        &self,
        worker_id: usize,
        port: u16,
        persona: Arc<dyn Persona>,
    ) -> Result<WorkerHandle> {
        if self.workers.read().await.contains_key(&worker_id) {
            return Err(PoolError::WorkerStartup {
                worker_id,
                reason: "already running".to_string(),
            });
        }

        let bind_addr = format!("{}:{}", self.capabilities.bind_host, port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| PoolError::WorkerStartup {
                worker_id,
                reason: format!("bind {}: {}", bind_addr, e),
            })?;

        let handle = WorkerHandle::new(worker_id, port);
        let cancel = self.cancel_root.child_token();
        let service = WorkerService::new(worker_id, persona.clone(), &self.worker_config);

        // Supervisor: a clean exit is a stop, anything else is a crash that
        // takes the worker out of the callable set until a restart succeeds.
        let supervised = handle.clone();
        let run_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            match service.run(listener, run_cancel).await {
                Ok(()) => {
                    supervised.set_status(WorkerStatus::Stopped);
                    debug!(worker_id, "worker run loop exited");
                }
                Err(e) => {
                    supervised.set_status(WorkerStatus::Crashed);
                    warn!(worker_id, error = %e, "worker run loop crashed");
                }
            }
        });

        self.workers.write().await.insert(
            worker_id,
            WorkerEntry {
                handle: handle.clone(),
                persona,
                cancel,
                join,
            },
        );
        info!(worker_id, port, "worker started");

        let url = self.health_url(port);
        if poll_ready(
            &self.probe_client,
            &url,
            self.lifecycle.readiness_poll_interval,
            self.lifecycle.readiness_max_attempts,
        )
        .await
        {
            // Only promote if the supervisor has not recorded a crash since
            if handle.status() == WorkerStatus::Starting {
                handle.set_status(WorkerStatus::Ready);
                info!(worker_id, port, "worker ready");
            }
        } else {
            warn!(
                worker_id,
                port, "worker not ready after readiness polling; proceeding degraded"
            );
        }

        Ok(handle)
    }

    /// Restart a worker on its existing port.
    ///
    /// Cancels the running instance, waits for the OS to actually free the
    /// port (a slow shutdown can hold it past cancellation), then starts
    /// again. Returns `false` when the restart itself fails.
    pub async fn restart(&self, worker_id: usize) -> bool {
        let entry = self.workers.write().await.remove(&worker_id);
        let Some(entry) = entry else {
            warn!(worker_id, "restart requested for unknown worker");
            return false;
        };

        let WorkerEntry {
            handle,
            persona,
            cancel,
            join,
        } = entry;
        let port = handle.port();
        info!(worker_id, port, "restarting worker");

        cancel.cancel();
        let mut join = join;
        if timeout(self.lifecycle.shutdown_grace, &mut join).await.is_err() {
            warn!(worker_id, "worker ignored shutdown grace; aborting");
            join.abort();
        }
        handle.set_status(WorkerStatus::Stopped);

        // Never attempt a bind while the old instance still holds the port
        if !wait_until_free(
            port,
            self.lifecycle.port_free_poll_interval,
            self.lifecycle.port_free_timeout,
        )
        .await
        {
            warn!(worker_id, port, "port never freed; restart abandoned");
            return false;
        }

        match self.start(worker_id, port, persona).await {
            Ok(_) => true,
            Err(e) => {
                warn!(worker_id, error = %e, "restart failed");
                false
            }
        }
    }

    /// Stop every worker and await termination within the grace period.
    pub async fn stop_all(&self) {
        let entries: Vec<(usize, WorkerEntry)> =
            self.workers.write().await.drain().collect();
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "stopping all workers");
        self.cancel_root.cancel();

        for (worker_id, entry) in entries {
            let WorkerEntry { handle, join, .. } = entry;
            let mut join = join;
            if timeout(self.lifecycle.shutdown_grace, &mut join).await.is_err() {
                warn!(worker_id, "worker ignored shutdown grace; aborting");
                join.abort();
            }
            handle.set_status(WorkerStatus::Stopped);
        }
    }

    /// Probe a worker's health endpoint; any non-error response is healthy.
    pub async fn health_check(&self, worker_id: usize) -> bool {
        let Some(port) = self.worker_port(worker_id).await else {
            return false;
        };
        match self.probe_client.get(self.health_url(port)).send().await {
            Ok(response) => {
                let status = response.status();
                !status.is_client_error() && !status.is_server_error()
            }
            Err(_) => false,
        }
    }

    /// Port of a worker that is safe to call.
    ///
    /// # Errors
    ///
    /// Fails fast with [`PoolError::WorkerCrashed`] / [`PoolError::WorkerStopped`]
    /// instead of letting a call hang against a dead listener.
    pub async fn require_callable(&self, worker_id: usize) -> Result<u16> {
        let workers = self.workers.read().await;
        let entry = workers
            .get(&worker_id)
            .ok_or(PoolError::UnknownWorker(worker_id))?;
        match entry.handle.status() {
            WorkerStatus::Crashed => Err(PoolError::WorkerCrashed(worker_id)),
            WorkerStatus::Stopped => Err(PoolError::WorkerStopped(worker_id)),
            WorkerStatus::Starting | WorkerStatus::Ready => Ok(entry.handle.port()),
        }
    }

    /// Port of a worker, regardless of status
    pub async fn worker_port(&self, worker_id: usize) -> Option<u16> {
        self.workers
            .read()
            .await
            .get(&worker_id)
            .map(|entry| entry.handle.port())
    }

    /// Status of a worker
    pub async fn worker_status(&self, worker_id: usize) -> Option<WorkerStatus> {
        self.workers
            .read()
            .await
            .get(&worker_id)
            .map(|entry| entry.handle.status())
    }

    /// Host clients use to reach workers
    pub fn callback_host(&self) -> &'static str {
        self.capabilities.callback_host()
    }

    fn health_url(&self, port: u16) -> String {
        format!(
            "http://{}:{}/health",
            self.capabilities.callback_host(),
            port
        )
    }
}

/// Poll a readiness endpoint until it answers or attempts run out.
///
/// The first probe fires immediately; each subsequent probe waits the
/// configured interval, so a worker that comes up on probe N has waited at
/// least (N-1) intervals.
pub async fn poll_ready(
    client: &reqwest::Client,
    url: &str,
    interval: Duration,
    max_attempts: u32,
) -> bool {
    for attempt in 0..max_attempts {
        if attempt > 0 {
            tokio::time::sleep(interval).await;
        }
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_client_error() && !status.is_server_error() {
                    return true;
                }
                debug!(url, %status, "readiness probe rejected");
            }
            Err(e) => debug!(url, error = %e, "readiness probe failed"),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::probe_free;
    use choros_core::persona::{Strategy, StrategyPersona};
    use std::time::Instant;

    fn test_lifecycle_config() -> LifecycleConfig {
        LifecycleConfig {
            stagger: Duration::from_millis(10),
            readiness_poll_interval: Duration::from_millis(50),
            readiness_max_attempts: 40,
            probe_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
            port_free_poll_interval: Duration::from_millis(50),
            port_free_timeout: Duration::from_secs(2),
        }
    }

    fn test_pool() -> WorkerPool {
        WorkerPool::new(
            test_lifecycle_config(),
            WorkerConfig::default(),
            Capabilities::detect_from(&WorkerConfig::default(), |_| None),
        )
        .unwrap()
    }

    fn test_persona() -> Arc<dyn Persona> {
        Arc::new(StrategyPersona::new("Probe", Strategy::BestAvailable))
    }

    fn pick_free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_start_reaches_ready_and_stop_frees_port() {
        let pool = test_pool();
        let port = pick_free_port();

        let handle = pool.start(7, port, test_persona()).await.unwrap();
        assert_eq!(handle.status(), WorkerStatus::Ready);
        assert!(pool.health_check(7).await);
        assert_eq!(pool.require_callable(7).await.unwrap(), port);

        pool.stop_all().await;
        assert_eq!(handle.status(), WorkerStatus::Stopped);
        assert!(probe_free(port));
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let pool = test_pool();
        let port = pick_free_port();

        pool.start(1, port, test_persona()).await.unwrap();
        let second = pool.start(1, port, test_persona()).await;
        assert!(matches!(
            second,
            Err(PoolError::WorkerStartup { worker_id: 1, .. })
        ));

        pool.stop_all().await;
    }

    #[tokio::test]
    async fn test_restart_rebinds_same_port() {
        let pool = test_pool();
        let port = pick_free_port();

        pool.start(2, port, test_persona()).await.unwrap();
        assert!(pool.restart(2).await);
        assert_eq!(pool.worker_port(2).await, Some(port));
        assert_eq!(pool.worker_status(2).await, Some(WorkerStatus::Ready));
        assert!(pool.health_check(2).await);

        pool.stop_all().await;
    }

    #[tokio::test]
    async fn test_restart_unknown_worker_is_false() {
        let pool = test_pool();
        assert!(!pool.restart(99).await);
    }

    #[tokio::test]
    async fn test_require_callable_unknown_worker() {
        let pool = test_pool();
        assert!(matches!(
            pool.require_callable(4).await,
            Err(PoolError::UnknownWorker(4))
        ));
    }

    #[tokio::test]
    async fn test_poll_ready_waits_for_late_listener() {
        let port = pick_free_port();
        let interval = Duration::from_millis(100);

        // Listener appears only after three full poll intervals
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(350)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            let app = axum::Router::new()
                .route("/health", axum::routing::get(|| async { "ok" }));
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap();
        let url = format!("http://127.0.0.1:{}/health", port);

        let started = Instant::now();
        assert!(poll_ready(&client, &url, interval, 20).await);
        assert!(started.elapsed() >= interval * 3);
    }

    #[tokio::test]
    async fn test_poll_ready_gives_up() {
        let port = pick_free_port();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let url = format!("http://127.0.0.1:{}/health", port);

        assert!(!poll_ready(&client, &url, Duration::from_millis(20), 3).await);
    }
}
